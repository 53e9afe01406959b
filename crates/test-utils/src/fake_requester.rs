use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use runwright::collection::Request;
use runwright::errors::TransportError;
use runwright::exec::{
    BoxFuture, RequestOptions, RequestOutcome, Requester, Response, ResponseStartHook,
};

/// What the fake answers for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    Fail(String),
    /// Transport error that still carries a response.
    FailWithResponse(String, Response),
}

/// A fake requester that:
/// - records every request it was asked to send (after the pipeline ran)
/// - answers from per-URL reply queues, falling back to `200 OK`
/// - can delay every answer, or hang forever on selected URLs.
#[derive(Debug, Default)]
pub struct FakeRequester {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    hang: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    sent: Mutex<Vec<Request>>,
    options: Mutex<Vec<RequestOptions>>,
}

impl FakeRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply for `url`. Queued replies are used once each, in order.
    pub fn reply(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, url: &str, code: u16, body: &str) {
        self.reply(url, Reply::Respond(Response::new(code, "OK").with_body(body)));
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.reply(url, Reply::Fail(message.to_string()));
    }

    /// Never answer requests to `url`.
    pub fn hang_on(&self, url: &str) {
        self.hang.lock().unwrap().insert(url.to_string());
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_urls(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }

    pub fn options_seen(&self) -> Vec<RequestOptions> {
        self.options.lock().unwrap().clone()
    }

    fn next_reply(&self, url: &str) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Reply::Respond(Response::new(200, "OK").with_body("ok")))
    }
}

impl Requester for FakeRequester {
    fn send<'a>(
        &'a self,
        request: Request,
        options: &'a RequestOptions,
        on_response_start: ResponseStartHook<'a>,
    ) -> BoxFuture<'a, RequestOutcome> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(request.clone());
            self.options.lock().unwrap().push(options.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let hang = self.hang.lock().unwrap().contains(&request.url);
            if hang {
                std::future::pending::<()>().await;
            }

            match self.next_reply(&request.url) {
                Reply::Respond(response) => {
                    on_response_start(&response);
                    RequestOutcome::success(request, response)
                }
                Reply::Fail(message) => {
                    RequestOutcome::failure(request, TransportError::new(message))
                }
                Reply::FailWithResponse(message, response) => {
                    on_response_start(&response);
                    RequestOutcome {
                        error: Some(TransportError::new(message)),
                        response: Some(response),
                        ..RequestOutcome::success(request, Response::default())
                    }
                }
            }
        })
    }
}
