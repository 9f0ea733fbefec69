//! In-memory fakes for the network seams.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::http::{FetchOptions, FetchResponse, Fetcher, PageRenderer};
use crate::oracle::{Oracle, OracleRequest};

/// Serves canned bodies by exact URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct StubFetcher {
    pages: HashMap<String, (u16, String)>,
    failing: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(url.to_string(), (status, body.to_string()));
        self
    }

    /// Transport-level failure (connection refused) for `url`.
    pub fn with_failure(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// URLs fetched with GET, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<(u16, String)> {
        if self.failing.contains(url) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused: {url}"),
            )));
        }
        Ok(self
            .pages
            .get(url)
            .cloned()
            .unwrap_or((404, String::new())))
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn get(&self, url: &str, _opts: &FetchOptions) -> Result<FetchResponse> {
        self.requests.lock().unwrap().push(url.to_string());
        let (status, body) = self.lookup(url)?;
        Ok(FetchResponse { status, body })
    }

    async fn head(&self, url: &str, _opts: &FetchOptions) -> Result<u16> {
        Ok(self.lookup(url)?.0)
    }
}

pub struct StubRenderer {
    html: String,
}

impl StubRenderer {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
        }
    }
}

#[async_trait]
impl PageRenderer for StubRenderer {
    async fn render(&self, _url: &str) -> Result<String> {
        Ok(self.html.clone())
    }
}

type Responder = Box<dyn Fn(&OracleRequest) -> Result<String> + Send + Sync>;

/// Replays queued replies in order, or answers through a closure.
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    responder: Option<Responder>,
    seen: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&OracleRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(f)),
            ..Self::default()
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(f) = &self.responder {
            return f(request);
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(Error::Oracle(message)),
            None => Err(Error::Oracle("script exhausted".into())),
        }
    }
}
