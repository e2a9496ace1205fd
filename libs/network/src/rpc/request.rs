//! Request and response values
//!
//! [`RpcRequest`] is a plain value: building one never touches the network,
//! and retrying one means cloning it. Operation-specific request types plug
//! in through [`TypedRequest`].

use crate::error::Result;
use bytes::Bytes;
use rpc_types::Guid;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub body: Bytes,
    pub attachments: Vec<Bytes>,
    /// Falls back to the client's default request timeout
    pub timeout: Option<Duration>,
    pub trace_id: Option<Guid>,
    pub request_ack: bool,
    /// Assigned on first send when absent and kept across retries
    pub request_id: Option<Guid>,
    pub retry: bool,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            body: body.into(),
            attachments: Vec::new(),
            timeout: None,
            trace_id: None,
            request_ack: false,
            request_id: None,
            retry: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_trace_id(mut self, trace_id: Guid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_request_ack(mut self, request_ack: bool) -> Self {
        self.request_ack = request_ack;
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<Bytes>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    pub fn with_attachments(mut self, attachments: impl IntoIterator<Item = Bytes>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    pub fn with_request_id(mut self, request_id: Guid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Successful response: envelope-decoded body plus attachments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcResponse {
    pub body: Bytes,
    pub attachments: Vec<Bytes>,
}

/// An operation with its own body and response encoding
///
/// Implementors are data holders; the client never interprets the body.
pub trait TypedRequest: Send + Sync {
    type Response: Send;

    fn service(&self) -> &str;

    fn method(&self) -> &str;

    fn write_body(&self) -> Result<Bytes>;

    fn attachments(&self) -> Vec<Bytes> {
        Vec::new()
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn parse_response(&self, response: RpcResponse) -> Result<Self::Response>;

    fn to_rpc_request(&self) -> Result<RpcRequest> {
        let mut request = RpcRequest::new(self.service(), self.method(), self.write_body()?)
            .with_attachments(self.attachments());
        request.timeout = self.timeout();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    impl TypedRequest for Echo {
        type Response = String;

        fn service(&self) -> &str {
            "EchoService"
        }

        fn method(&self) -> &str {
            "Echo"
        }

        fn write_body(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(self.0.as_bytes()))
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(1))
        }

        fn parse_response(&self, response: RpcResponse) -> Result<String> {
            Ok(String::from_utf8_lossy(&response.body).into_owned())
        }
    }

    #[test]
    fn test_builder_is_by_value() {
        let base = RpcRequest::new("ApiService", "GetNode", Bytes::from_static(b"//home"));
        let retried = base
            .clone()
            .with_request_id(Guid::new(1, 2))
            .with_request_ack(true)
            .with_attachment(Bytes::from_static(b"a"));

        assert!(base.request_id.is_none());
        assert!(base.attachments.is_empty());
        assert_eq!(retried.request_id, Some(Guid::new(1, 2)));
        assert!(retried.request_ack);
        assert_eq!(retried.attachments.len(), 1);
    }

    #[test]
    fn test_typed_request_conversion() {
        let request = Echo("hello").to_rpc_request().unwrap();
        assert_eq!(request.service, "EchoService");
        assert_eq!(request.method, "Echo");
        assert_eq!(&request.body[..], b"hello");
        assert_eq!(request.timeout, Some(Duration::from_secs(1)));

        let parsed = Echo("hello")
            .parse_response(RpcResponse {
                body: Bytes::from_static(b"world"),
                attachments: Vec::new(),
            })
            .unwrap();
        assert_eq!(parsed, "world");
    }
}
