//! Wire protocol: JSON envelopes over websocket text frames
//!
//! Every frame carries one envelope: `{"type": <string>, "payload": <json>}`.
//! The payload is embedded as JSON, never string-escaped, and is decoded
//! into a concrete body in a second step once the type is known.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// Message discriminator carried in the envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Server -> client: full path-to-hash snapshot, sent on connect
    Manifest,
    /// Client -> server: paths whose content the client needs
    FileRequest,
    /// Server -> client: one file's full content
    FileContent,
    /// Either direction: a mutation to replicate
    FileOperation,
    /// Anything else; logged and skipped by receivers
    #[serde(other)]
    Unknown,
}

/// One wire frame: a type tag plus an opaque body
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Serialize a body into a complete envelope frame.
    ///
    /// # Errors
    /// Returns an error if the body fails to serialize.
    pub fn encode<T: Serialize>(msg_type: MessageType, body: &T) -> color_eyre::Result<String> {
        let payload = serde_json::to_value(body)?;
        Ok(serde_json::to_string(&Self { msg_type, payload })?)
    }

    /// Parse a text frame into an envelope, leaving the payload undecoded.
    ///
    /// # Errors
    /// Returns an error if the frame is not a valid envelope.
    pub fn decode(text: &str) -> color_eyre::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the payload as a concrete message body.
    ///
    /// # Errors
    /// Returns an error if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> color_eyre::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// `file_request` body: all paths the client wants, in one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub paths: Vec<String>,
}

/// `file_content` body: one file's bytes, base64 on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    #[serde(with = "b64")]
    pub content: Vec<u8>,
}

/// What a `file_operation` does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Write,
    Remove,
}

/// `file_operation` body: a single replicated mutation.
///
/// `write` with `is_dir` creates a directory and carries no content;
/// `write` without it carries the file's full bytes; `remove` recursively
/// deletes whatever is at `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    pub op: OpKind,
    pub path: String,
    #[serde(default, with = "b64::opt", skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_dir: bool,
}

impl FileOperation {
    /// A file write carrying full content
    #[must_use]
    pub fn write(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            op: OpKind::Write,
            path: path.into(),
            content: Some(content),
            is_dir: false,
        }
    }

    /// A directory creation
    #[must_use]
    pub fn mkdir(path: impl Into<String>) -> Self {
        Self {
            op: OpKind::Write,
            path: path.into(),
            content: None,
            is_dir: true,
        }
    }

    /// A recursive removal
    #[must_use]
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: OpKind::Remove,
            path: path.into(),
            content: None,
            is_dir: false,
        }
    }
}

/// Manifest message body is the manifest itself (`{"files": {...}}`).
pub type ManifestMessage = Manifest;

fn is_false(v: &bool) -> bool {
    !v
}

/// Base64 (de)serialization for binary content fields
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            let encoded = Option::<String>::deserialize(deserializer)?;
            encoded
                .map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_payload_is_raw_json() {
        let body = FileRequest {
            paths: vec!["a.txt".to_string(), "sub/b.txt".to_string()],
        };
        let frame = Envelope::encode(MessageType::FileRequest, &body).unwrap();

        // The payload must be embedded as JSON, not as an escaped string.
        assert_eq!(
            frame,
            r#"{"type":"file_request","payload":{"paths":["a.txt","sub/b.txt"]}}"#
        );
    }

    #[test]
    fn test_envelope_roundtrip() {
        let body = FileContent {
            path: "dir/data.bin".to_string(),
            content: vec![0, 1, 2, 255],
        };
        let frame = Envelope::encode(MessageType::FileContent, &body).unwrap();

        let envelope = Envelope::decode(&frame).unwrap();
        assert_eq!(envelope.msg_type, MessageType::FileContent);
        let decoded: FileContent = envelope.payload_as().unwrap();
        assert_eq!(decoded.path, "dir/data.bin");
        assert_eq!(decoded.content, vec![0, 1, 2, 255]);
    }

    #[test]
    fn test_content_is_base64_on_the_wire() {
        let body = FileContent {
            path: "x".to_string(),
            content: b"hello".to_vec(),
        };
        let frame = Envelope::encode(MessageType::FileContent, &body).unwrap();
        assert!(frame.contains(r#""content":"aGVsbG8=""#), "frame: {frame}");
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let envelope =
            Envelope::decode(r#"{"type":"update_notification","payload":{"op":"write"}}"#).unwrap();
        assert_eq!(envelope.msg_type, MessageType::Unknown);
    }

    #[test]
    fn test_malformed_envelope_is_an_error() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn test_file_operation_optional_fields_omitted() {
        let write = FileOperation::write("f.txt", b"x".to_vec());
        let json = serde_json::to_string(&write).unwrap();
        assert_eq!(json, r#"{"op":"write","path":"f.txt","content":"eA=="}"#);

        let mkdir = FileOperation::mkdir("d");
        let json = serde_json::to_string(&mkdir).unwrap();
        assert_eq!(json, r#"{"op":"write","path":"d","is_dir":true}"#);

        let remove = FileOperation::remove("gone");
        let json = serde_json::to_string(&remove).unwrap();
        assert_eq!(json, r#"{"op":"remove","path":"gone"}"#);
    }

    #[test]
    fn test_file_operation_missing_fields_default() {
        let op: FileOperation = serde_json::from_str(r#"{"op":"remove","path":"p"}"#).unwrap();
        assert_eq!(op.op, OpKind::Remove);
        assert!(op.content.is_none());
        assert!(!op.is_dir);
    }

    #[test]
    fn test_manifest_body_shape() {
        let mut manifest = Manifest::default();
        let _ = manifest
            .files
            .insert("foo.txt".to_string(), "deadbeef".to_string());
        let frame = Envelope::encode(MessageType::Manifest, &manifest).unwrap();
        assert_eq!(
            frame,
            r#"{"type":"manifest","payload":{"files":{"foo.txt":"deadbeef"}}}"#
        );
    }
}
