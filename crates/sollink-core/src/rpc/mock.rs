use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;

use super::transport::RpcTransport;

/// A canned reply for one method call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with `{"result": value}`, echoing the request id.
    Result(Value),
    /// Answer with `{"error": value}`, echoing the request id.
    Error(Value),
    /// Answer with this body verbatim.
    Raw(String),
    /// Fail at the transport level.
    Unreachable,
}

/// A request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// A mock transport for testing. Replies come from per-method queues populated
/// via the builder pattern; the last reply of a queue repeats.
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            replies: HashMap::new(),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn last_request(&self, method: &str) -> Option<RecordedRequest> {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.method == method)
    }

    fn next_reply(&self, method: &str) -> Option<MockReply> {
        let mut replies = self.replies.lock().expect("replies lock");
        let queue = replies.get_mut(method)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

pub struct MockTransportBuilder {
    replies: HashMap<String, VecDeque<MockReply>>,
}

impl MockTransportBuilder {
    pub fn reply(mut self, method: &str, reply: MockReply) -> Self {
        self.replies
            .entry(method.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn result(self, method: &str, value: Value) -> Self {
        self.reply(method, MockReply::Result(value))
    }

    pub fn error(self, method: &str, value: Value) -> Self {
        self.reply(method, MockReply::Error(value))
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            replies: Mutex::new(self.replies),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn post(&self, body: String) -> Result<String, TransportError> {
        let request: Value = serde_json::from_str(&body).expect("client sends valid JSON");
        let id = request["id"].as_u64().expect("client sends numeric ids");
        let method = request["method"].as_str().unwrap_or_default().to_owned();
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                id,
                method: method.clone(),
                params: request["params"].clone(),
            });

        let reply = self.next_reply(&method).unwrap_or_else(|| {
            MockReply::Error(json!({"code": -32601, "message": "Method not found"}))
        });
        match reply {
            MockReply::Result(result) => {
                Ok(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
            }
            MockReply::Error(error) => {
                Ok(json!({"jsonrpc": "2.0", "id": id, "error": error}).to_string())
            }
            MockReply::Raw(raw) => Ok(raw),
            MockReply::Unreachable => Err(TransportError::ConnectionLost(
                "mock endpoint unreachable".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_reply_repeats() {
        let mock = MockTransport::builder()
            .result("getSlot", json!(1))
            .result("getSlot", json!(2))
            .build();
        let ask = |id: u64| {
            json!({"jsonrpc": "2.0", "id": id, "method": "getSlot", "params": []}).to_string()
        };
        let reply = |body: String| -> Value { serde_json::from_str(&body).expect("json") };

        let first = reply(mock.post(ask(1)).await.expect("reply"));
        let second = reply(mock.post(ask(2)).await.expect("reply"));
        let third = reply(mock.post(ask(3)).await.expect("reply"));
        assert_eq!(first["result"], json!(1));
        assert_eq!(second["result"], json!(2));
        assert_eq!(third["result"], json!(2));
        assert_eq!(third["id"], json!(3));
        assert_eq!(mock.requests().len(), 3);
    }
}
