//! HTTP implementation of the poll endpoints.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use crate::{
    dto::poll::{
        ChatResponse, CommandResponse, CurrentQuestionResponse, KeepAliveRequest, RankingResponse,
        StatusResponse, VoteRequest, VotesResponse,
    },
    error::TransportError,
    state::Command,
    transport::PollClient,
};

const STATUS: &str = "/api/quiz/status-http";
const CURRENT_QUESTION: &str = "/api/quiz/current-question-http";
const VOTES: &str = "/api/quiz/votes-http";
const CHAT: &str = "/api/quiz/chat-http";
const RANKING: &str = "/api/ranking-http";
const START: &str = "/api/quiz/start-http";
const STOP: &str = "/api/quiz/stop-http";
const VOTE: &str = "/api/quiz/vote-http";
const KEEP_ALIVE: &str = "/api/quiz/keep-alive-http";

/// Poll client talking to the quiz server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPollClient {
    client: Client,
    base_url: Arc<str>,
}

impl HttpPollClient {
    /// Build a client for `base_url`; `timeout` bounds each request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportError::InvalidEndpoint {
                url: base_url.to_string(),
                reason: "poll endpoint must use http:// or https://",
            });
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::Request {
                path: base_url.to_string(),
                source: Box::new(source),
            })?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send `builder` and decode the body; `None` on 404.
    async fn fetch<T>(
        &self,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        trace!(path, "poll request");
        let response = builder.send().await.map_err(|source| TransportError::Request {
            path: path.to_string(),
            source: Box::new(source),
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json::<T>().await.map(Some).map_err(|source| {
                TransportError::Decode {
                    path: path.to_string(),
                    source: Box::new(source),
                }
            }),
            other => Err(TransportError::Status {
                path: path.to_string(),
                status: other.as_u16(),
            }),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, TransportError> {
        self.fetch(path, self.request(Method::GET, path)).await
    }

    async fn require<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.get(path).await?.ok_or_else(|| TransportError::Status {
            path: path.to_string(),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.request(Method::POST, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.fetch(path, builder).await?.ok_or_else(|| TransportError::Status {
            path: path.to_string(),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }
}

impl PollClient for HttpPollClient {
    fn status(&self) -> BoxFuture<'static, Result<StatusResponse, TransportError>> {
        let client = self.clone();
        Box::pin(async move { client.require(STATUS).await })
    }

    fn current_question(
        &self,
    ) -> BoxFuture<'static, Result<Option<CurrentQuestionResponse>, TransportError>> {
        let client = self.clone();
        Box::pin(async move { client.get(CURRENT_QUESTION).await })
    }

    fn votes(&self) -> BoxFuture<'static, Result<Option<VotesResponse>, TransportError>> {
        let client = self.clone();
        Box::pin(async move { client.get(VOTES).await })
    }

    fn chat_since(
        &self,
        since_secs: f64,
    ) -> BoxFuture<'static, Result<ChatResponse, TransportError>> {
        let client = self.clone();
        Box::pin(async move {
            let builder = client
                .request(Method::GET, CHAT)
                .query(&[("since", since_secs)]);
            Ok(client.fetch(CHAT, builder).await?.unwrap_or_default())
        })
    }

    fn ranking(&self) -> BoxFuture<'static, Result<RankingResponse, TransportError>> {
        let client = self.clone();
        Box::pin(async move {
            Ok(client
                .get(RANKING)
                .await?
                .unwrap_or(RankingResponse { ranking: None }))
        })
    }

    fn send_command(
        &self,
        command: Command,
    ) -> BoxFuture<'static, Result<CommandResponse, TransportError>> {
        let client = self.clone();
        Box::pin(async move {
            match command {
                Command::StartQuiz => client.post::<(), _>(START, None).await,
                Command::StopQuiz => client.post::<(), _>(STOP, None).await,
                Command::CastVote(option) => client.post(VOTE, Some(&VoteRequest { option })).await,
            }
        })
    }

    fn keep_alive(
        &self,
        request: KeepAliveRequest,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let client = self.clone();
        Box::pin(async move {
            let response = client
                .request(Method::POST, KEEP_ALIVE)
                .json(&request)
                .send()
                .await
                .map_err(|source| TransportError::Request {
                    path: KEEP_ALIVE.to_string(),
                    source: Box::new(source),
                })?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(TransportError::Status {
                    path: KEEP_ALIVE.to_string(),
                    status: response.status().as_u16(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_must_be_http() {
        let client = HttpPollClient::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();
        assert_eq!(&*client.base_url, "http://localhost:5000");
        assert!(matches!(
            HttpPollClient::new("ws://localhost:5000", Duration::from_secs(5)),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }
}
