//! Scripted transports shared by adapter and session tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::{self, BoxFuture};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::{
    dto::{
        common::{ChatMessageDto, OptionsDto, QuestionDto, RankingDto, VotesDto},
        poll::{
            ChatResponse, CommandResponse, CurrentQuestionResponse, KeepAliveRequest,
            RankingResponse, StatusResponse, VotesResponse,
        },
    },
    error::TransportError,
    state::Command,
    transport::{PollClient, PushConnector, PushLink},
};

/// What the fake server pushes down a link.
#[derive(Debug)]
pub(crate) enum ServerFrame {
    Text(String),
    Close,
    Fail,
}

/// Server end of an accepted fake link.
pub(crate) struct FakeServer {
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub(crate) fn send_event(&self, event: &str, data: Value) {
        self.send_raw(&json!({"event": event, "data": data}).to_string());
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(ServerFrame::Text(text.to_string()));
    }

    pub(crate) fn close(&self) {
        let _ = self.to_client.send(ServerFrame::Close);
    }

    pub(crate) fn fail(&self) {
        let _ = self.to_client.send(ServerFrame::Fail);
    }

    /// Wait for the next client frame named `event`, skipping others.
    pub(crate) async fn expect_event(&mut self, event: &str) -> Value {
        loop {
            let text = self
                .from_client
                .recv()
                .await
                .unwrap_or_else(|| panic!("link closed while waiting for {event}"));
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["event"] == event {
                return frame;
            }
        }
    }

    /// Every client frame received so far.
    pub(crate) fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }
}

struct FakeLink {
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    outbound: mpsc::UnboundedSender<String>,
}

impl PushLink for FakeLink {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        let sent = self.outbound.send(text).map_err(|_| TransportError::Closed);
        Box::pin(future::ready(sent))
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        Box::pin(async move {
            match self.inbound.recv().await {
                Some(ServerFrame::Text(text)) => Ok(Some(text)),
                Some(ServerFrame::Close) | None => Ok(None),
                Some(ServerFrame::Fail) => Err(TransportError::Link("connection reset".into())),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.inbound.close();
        Box::pin(future::ready(()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectBehavior {
    Refuse,
    Hang,
    Accept,
}

/// Connector following a script, then a fallback behaviour.
pub(crate) struct FakePushConnector {
    script: Mutex<VecDeque<ConnectBehavior>>,
    fallback: ConnectBehavior,
    attempts: AtomicUsize,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakePushConnector {
    pub(crate) fn new(
        script: impl IntoIterator<Item = ConnectBehavior>,
        fallback: ConnectBehavior,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            attempts: AtomicUsize::new(0),
            servers,
        });
        (connector, accepted)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PushConnector for FakePushConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushLink>, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match behavior {
            ConnectBehavior::Refuse => Box::pin(future::ready(Err(TransportError::Connect {
                url: "fake://push".into(),
                source: "connection refused".into(),
            }))),
            ConnectBehavior::Hang => Box::pin(future::pending()),
            ConnectBehavior::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let _ = self.servers.send(FakeServer {
                    to_client,
                    from_client,
                });
                let link: Box<dyn PushLink> = Box::new(FakeLink { inbound, outbound });
                Box::pin(future::ready(Ok(link)))
            }
        }
    }
}

/// Canned poll responses.
#[derive(Debug, Clone)]
pub(crate) struct PollScript {
    pub(crate) failing: bool,
    pub(crate) quiz_running: bool,
    pub(crate) question: Option<CurrentQuestionResponse>,
    pub(crate) votes: Option<VotesResponse>,
    pub(crate) votes_delay: Duration,
    pub(crate) chat: Vec<ChatMessageDto>,
    pub(crate) ranking: Option<RankingDto>,
    pub(crate) command_response: CommandResponse,
}

impl Default for PollScript {
    fn default() -> Self {
        Self {
            failing: false,
            quiz_running: false,
            question: None,
            votes: None,
            votes_delay: Duration::ZERO,
            chat: Vec::new(),
            ranking: None,
            command_response: CommandResponse {
                success: true,
                message: None,
            },
        }
    }
}

/// Requests a [`FakePollClient`] has seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct PollCalls {
    pub(crate) status: usize,
    pub(crate) question: usize,
    pub(crate) votes: usize,
    pub(crate) chat_since: Vec<f64>,
    pub(crate) ranking: usize,
    pub(crate) commands: Vec<Command>,
    pub(crate) keep_alives: Vec<KeepAliveRequest>,
}

#[derive(Default)]
pub(crate) struct FakePollClient {
    script: Mutex<PollScript>,
    calls: Mutex<PollCalls>,
}

impl FakePollClient {
    pub(crate) fn new(script: PollScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::default(),
        })
    }

    pub(crate) fn update(&self, change: impl FnOnce(&mut PollScript)) {
        change(&mut self.script.lock().unwrap());
    }

    pub(crate) fn calls(&self) -> PollCalls {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl FnOnce(&mut PollCalls)) -> PollScript {
        call(&mut self.calls.lock().unwrap());
        self.script.lock().unwrap().clone()
    }
}

fn unavailable(path: &str) -> TransportError {
    TransportError::Status {
        path: path.into(),
        status: 503,
    }
}

fn respond<T: Send + 'static>(
    script: &PollScript,
    path: &'static str,
    value: T,
) -> BoxFuture<'static, Result<T, TransportError>> {
    let result = if script.failing {
        Err(unavailable(path))
    } else {
        Ok(value)
    };
    Box::pin(future::ready(result))
}

impl PollClient for FakePollClient {
    fn status(&self) -> BoxFuture<'static, Result<StatusResponse, TransportError>> {
        let script = self.record(|calls| calls.status += 1);
        let response = StatusResponse {
            quiz_running: script.quiz_running,
        };
        respond(&script, "/api/quiz/status-http", response)
    }

    fn current_question(
        &self,
    ) -> BoxFuture<'static, Result<Option<CurrentQuestionResponse>, TransportError>> {
        let script = self.record(|calls| calls.question += 1);
        let question = script.question.clone();
        respond(&script, "/api/quiz/current-question-http", question)
    }

    fn votes(&self) -> BoxFuture<'static, Result<Option<VotesResponse>, TransportError>> {
        let script = self.record(|calls| calls.votes += 1);
        let delay = script.votes_delay;
        let response = respond(&script, "/api/quiz/votes-http", script.votes.clone());
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            response.await
        })
    }

    fn chat_since(
        &self,
        since_secs: f64,
    ) -> BoxFuture<'static, Result<ChatResponse, TransportError>> {
        let script = self.record(|calls| calls.chat_since.push(since_secs));
        let response = ChatResponse {
            messages: script
                .chat
                .iter()
                .filter(|message| message.timestamp.is_some_and(|at| at > since_secs))
                .cloned()
                .collect(),
        };
        respond(&script, "/api/quiz/chat-http", response)
    }

    fn ranking(&self) -> BoxFuture<'static, Result<RankingResponse, TransportError>> {
        let script = self.record(|calls| calls.ranking += 1);
        let response = RankingResponse {
            ranking: script.ranking.clone(),
        };
        respond(&script, "/api/ranking-http", response)
    }

    fn send_command(
        &self,
        command: Command,
    ) -> BoxFuture<'static, Result<CommandResponse, TransportError>> {
        let script = self.record(|calls| calls.commands.push(command));
        respond(&script, "/api/quiz/command", script.command_response.clone())
    }

    fn keep_alive(
        &self,
        request: KeepAliveRequest,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let script = self.record(|calls| calls.keep_alives.push(request));
        respond(&script, "/api/quiz/keep-alive-http", ())
    }
}

/// Poll answer describing question `number`.
pub(crate) fn question_response(number: u32, text: &str) -> CurrentQuestionResponse {
    CurrentQuestionResponse {
        question: QuestionDto {
            question: text.into(),
            options: OptionsDto::List(vec!["A1".into(), "B1".into(), "C1".into(), "D1".into()]),
        },
        question_num: number,
        total_questions: 10,
        remaining_time: Some(20),
    }
}

pub(crate) fn votes_response(counts: [u32; 4]) -> VotesResponse {
    VotesResponse {
        votes: VotesDto::List(counts.to_vec()),
        question_num: None,
    }
}

/// Push payload of a `next_question` event.
pub(crate) fn next_question_event(number: u32, text: &str) -> Value {
    json!({
        "question": {"question": text, "options": ["A1", "B1", "C1", "D1"]},
        "question_num": number,
        "total_questions": 10,
        "answer_time": 20
    })
}
