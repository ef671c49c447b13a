use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Binary part handed to the response encoder alongside the JSON metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub filename: String,
    pub bytes: Bytes,
    pub content_type: String,
}

/// A record plus its documents, ready to be written as a single reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionBundle {
    pub metadata: serde_json::Value,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Produces the wire representation of a [`SubmissionBundle`].
pub trait ResponseEncoder: Send + Sync {
    fn encode(&self, bundle: &SubmissionBundle) -> Result<EncodedBody, EncodingError>;
}

/// `multipart/form-data` encoder: a `data` JSON part followed by one part per attachment.
#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::with_boundary(format!("intake-{}", Uuid::new_v4().simple()))
    }
}

impl MultipartEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// The configured boundary, or a fresh variant of it when some body already contains it.
    fn boundary_for(&self, bodies: &[&[u8]]) -> String {
        let mut boundary = self.boundary.clone();
        while bodies
            .iter()
            .any(|body| contains(body, format!("--{boundary}").as_bytes()))
        {
            boundary = format!("{}-{}", self.boundary, Uuid::new_v4().simple());
        }
        boundary
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn write_part(
    boundary: &str,
    out: &mut BytesMut,
    name: &str,
    filename: Option<&str>,
    content_type: &str,
    body: &[u8],
) {
    out.put_slice(format!("--{boundary}\r\n").as_bytes());
    let disposition = match filename {
        Some(filename) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            quote(name),
            quote(filename)
        ),
        None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", quote(name)),
    };
    out.put_slice(disposition.as_bytes());
    out.put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

fn quote(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}

impl ResponseEncoder for MultipartEncoder {
    fn encode(&self, bundle: &SubmissionBundle) -> Result<EncodedBody, EncodingError> {
        let metadata = serde_json::to_vec(&bundle.metadata)?;
        let capacity = metadata.len()
            + bundle
                .attachments
                .iter()
                .map(|attachment| attachment.bytes.len() + 256)
                .sum::<usize>()
            + 256;

        let bodies: Vec<&[u8]> = std::iter::once(metadata.as_slice())
            .chain(bundle.attachments.iter().map(|attachment| &attachment.bytes[..]))
            .collect();
        let boundary = self.boundary_for(&bodies);

        let mut out = BytesMut::with_capacity(capacity);
        write_part(
            &boundary,
            &mut out,
            "data",
            None,
            mime::APPLICATION_JSON.as_ref(),
            &metadata,
        );
        for attachment in &bundle.attachments {
            write_part(
                &boundary,
                &mut out,
                &attachment.name,
                Some(&attachment.filename),
                &attachment.content_type,
                &attachment.bytes,
            );
        }
        out.put_slice(format!("--{boundary}--\r\n").as_bytes());

        Ok(EncodedBody {
            content_type: format!("multipart/form-data; boundary={boundary}"),
            body: out.freeze(),
        })
    }
}
