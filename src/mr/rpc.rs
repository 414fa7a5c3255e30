use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

use tonic::{Request, Status, metadata::{Ascii, MetadataValue}, service::Interceptor};

use super::{
    Datum,
    session::{Assignment, PollOutcome, TaskOutput},
    task_store::{Payload, TaskKind},
};

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/mr.Master.rs"));
}

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:11235";
const PASSWORD_HEADER: &str = "x-mr-password";
/// Reports and reduce groups are bounded by memory, not by tonic's 4 MiB default.
pub const MAX_MESSAGE_SIZE: usize = usize::MAX;

/* -- messages -- */

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct RegisterReply {
    #[prost(uint64, tag = "1")]
    pub client_id: u64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct PollRequest {
    #[prost(uint64, tag = "1")]
    pub client_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PollStatus {
    Wait = 0,
    Task = 1,
    PhaseDone = 2,
    JobDone = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PollReply {
    #[prost(enumeration = "PollStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub task: Option<TaskMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskMessage {
    #[prost(uint64, tag = "1")]
    pub task_id: u64,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key: Option<Vec<u8>>,
    #[prost(oneof = "task_message::Payload", tags = "3, 4")]
    pub payload: Option<task_message::Payload>,
}

pub mod task_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(bytes, tag = "3")]
        Record(Vec<u8>),
        #[prost(message, tag = "4")]
        Group(super::ValueList),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ValueList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Pair {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MapOutput {
    #[prost(message, repeated, tag = "1")]
    pub pairs: Vec<Pair>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReduceOutput {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskFailure {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReportRequest {
    #[prost(uint64, tag = "1")]
    pub client_id: u64,
    #[prost(uint64, tag = "2")]
    pub task_id: u64,
    #[prost(oneof = "report_request::Output", tags = "3, 4, 5")]
    pub output: Option<report_request::Output>,
}

pub mod report_request {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Output {
        #[prost(message, tag = "3")]
        Map(super::MapOutput),
        #[prost(message, tag = "4")]
        Reduce(super::ReduceOutput),
        #[prost(message, tag = "5")]
        Failed(super::TaskFailure),
    }
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ReportReply {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct GoodbyeRequest {
    #[prost(uint64, tag = "1")]
    pub client_id: u64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Ack {}

/* -- conversions -- */

impl From<PollOutcome> for PollReply {
    fn from(outcome: PollOutcome) -> Self {
        let (status, task) = match outcome {
            PollOutcome::Task(task) => (PollStatus::Task, Some(task.into())),
            PollOutcome::Wait => (PollStatus::Wait, None),
            PollOutcome::PhaseDone => (PollStatus::PhaseDone, None),
            PollOutcome::JobDone => (PollStatus::JobDone, None),
        };
        PollReply { status: status as i32, task }
    }
}

impl TryFrom<PollReply> for PollOutcome {
    type Error = Status;

    fn try_from(reply: PollReply) -> Result<Self, Status> {
        let status = PollStatus::try_from(reply.status)
            .map_err(|_| Status::invalid_argument(format!("unknown poll status {}", reply.status)))?;
        Ok(match (status, reply.task) {
            (PollStatus::Task, Some(task)) => PollOutcome::Task(task.try_into()?),
            (PollStatus::Task, None) => return Err(Status::invalid_argument("task status without a task")),
            (PollStatus::Wait, _) => PollOutcome::Wait,
            (PollStatus::PhaseDone, _) => PollOutcome::PhaseDone,
            (PollStatus::JobDone, _) => PollOutcome::JobDone,
        })
    }
}

impl From<Assignment> for TaskMessage {
    fn from(task: Assignment) -> Self {
        let payload = match task.payload {
            Payload::Record(value) => task_message::Payload::Record(value),
            Payload::Group(values) => task_message::Payload::Group(ValueList { values }),
        };
        TaskMessage { task_id: task.task_id, key: task.key, payload: Some(payload) }
    }
}

impl TryFrom<TaskMessage> for Assignment {
    type Error = Status;

    fn try_from(task: TaskMessage) -> Result<Self, Status> {
        let (kind, payload) = match task.payload {
            Some(task_message::Payload::Record(value)) => (TaskKind::Map, Payload::Record(value)),
            Some(task_message::Payload::Group(list)) => (TaskKind::Reduce, Payload::Group(list.values)),
            None => return Err(Status::invalid_argument(format!("task#{} has no payload", task.task_id))),
        };
        Ok(Assignment { task_id: task.task_id, kind, key: task.key, payload })
    }
}

/// What a client says about a task it was given.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Output(TaskOutput),
    Failed(String),
}

impl Report {
    pub fn into_request(self, client_id: u64, task_id: u64) -> ReportRequest {
        let output = match self {
            Report::Output(TaskOutput::Map(pairs)) => report_request::Output::Map(MapOutput {
                pairs: pairs.into_iter().map(|(key, value)| Pair { key, value }).collect(),
            }),
            Report::Output(TaskOutput::Reduce(value)) => report_request::Output::Reduce(ReduceOutput { value }),
            Report::Failed(message) => report_request::Output::Failed(TaskFailure { message }),
        };
        ReportRequest { client_id, task_id, output: Some(output) }
    }
}

/// Checks every datum is well formed; a bad one rejects the whole message.
impl TryFrom<report_request::Output> for Report {
    type Error = Status;

    fn try_from(output: report_request::Output) -> Result<Self, Status> {
        Ok(match output {
            report_request::Output::Map(map) => {
                let mut pairs = Vec::with_capacity(map.pairs.len());
                for pair in map.pairs {
                    pairs.push((check_datum(pair.key)?, check_datum(pair.value)?));
                }
                Report::Output(TaskOutput::Map(pairs))
            }
            report_request::Output::Reduce(reduce) => {
                Report::Output(TaskOutput::Reduce(reduce.value.map(check_datum).transpose()?))
            }
            report_request::Output::Failed(failure) => Report::Failed(failure.message),
        })
    }
}

fn check_datum(datum: Datum) -> Result<Datum, Status> {
    match serde_json::from_slice::<serde::de::IgnoredAny>(&datum) {
        Ok(_) => Ok(datum),
        Err(e) => Err(Status::invalid_argument(format!("malformed datum: {}", e))),
    }
}

/* -- addressing -- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for MasterAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(anyhow::anyhow!("empty unix socket path"));
            }
            return Ok(MasterAddr::Unix(PathBuf::from(path)));
        }
        let addr = s.parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid master address {:?}: {}", s, e))?;
        Ok(MasterAddr::Tcp(addr))
    }
}

impl fmt::Display for MasterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterAddr::Tcp(addr) => write!(f, "{}", addr),
            MasterAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl Default for MasterAddr {
    fn default() -> Self {
        MasterAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 11235)))
    }
}

/* -- shared password -- */

/// Server side: rejects calls without the configured password.
#[derive(Clone, Default)]
pub struct PasswordCheck {
    expected: Option<Arc<str>>,
}

impl PasswordCheck {
    pub fn new(password: Option<&str>) -> Self {
        PasswordCheck { expected: password.map(Arc::from) }
    }
}

impl Interceptor for PasswordCheck {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let Some(expected) = &self.expected else { return Ok(request) };
        match request.metadata().get(PASSWORD_HEADER).map(|v| v.as_bytes()) {
            Some(given) if given == expected.as_bytes() => Ok(request),
            _ => Err(Status::unauthenticated("bad or missing password")),
        }
    }
}

/// Client side: attaches the password to every call.
#[derive(Clone, Default)]
pub struct PasswordAttach {
    value: Option<MetadataValue<Ascii>>,
}

impl PasswordAttach {
    pub fn new(password: Option<&str>) -> Result<Self, anyhow::Error> {
        let value = password.map(|p| p.parse::<MetadataValue<Ascii>>()).transpose()
            .map_err(|e| anyhow::anyhow!("password is not valid metadata: {}", e))?;
        Ok(PasswordAttach { value })
    }
}

impl Interceptor for PasswordAttach {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(value) = &self.value {
            request.metadata_mut().insert(PASSWORD_HEADER, value.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addresses() {
        assert_eq!(DEFAULT_ADDRESS.parse::<MasterAddr>().unwrap(), MasterAddr::default());
        assert_eq!(
            "unix:/tmp/mr.sock".parse::<MasterAddr>().unwrap(),
            MasterAddr::Unix(PathBuf::from("/tmp/mr.sock")),
        );
        assert!("unix:".parse::<MasterAddr>().is_err());
        assert!("localhost".parse::<MasterAddr>().is_err());
        assert_eq!(MasterAddr::Unix(PathBuf::from("/x")).to_string(), "unix:/x");
    }

    #[test]
    fn poll_reply_carries_task() {
        let task = Assignment {
            task_id: 3,
            kind: TaskKind::Reduce,
            key: Some(b"\"a\"".to_vec()),
            payload: Payload::Group(vec![b"1".to_vec(), b"1".to_vec()]),
        };
        let reply = PollReply::from(PollOutcome::Task(task.clone()));
        assert_eq!(reply.status, PollStatus::Task as i32);
        assert_eq!(PollOutcome::try_from(reply).unwrap(), PollOutcome::Task(task));
        assert_eq!(PollOutcome::try_from(PollReply::from(PollOutcome::PhaseDone)).unwrap(), PollOutcome::PhaseDone);
    }

    #[test]
    fn task_status_without_task_is_malformed() {
        let reply = PollReply { status: PollStatus::Task as i32, task: None };
        assert!(PollOutcome::try_from(reply).is_err());
        let reply = PollReply { status: 42, task: None };
        assert!(PollOutcome::try_from(reply).is_err());
    }

    #[test]
    fn malformed_datum_rejects_report() {
        let output = report_request::Output::Map(MapOutput {
            pairs: vec![
                Pair { key: b"\"a\"".to_vec(), value: b"1".to_vec() },
                Pair { key: b"{oops".to_vec(), value: b"1".to_vec() },
            ],
        });
        let status = Report::try_from(output).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let ok = report_request::Output::Reduce(ReduceOutput { value: Some(b"[1,2]".to_vec()) });
        assert_eq!(Report::try_from(ok).unwrap(), Report::Output(TaskOutput::Reduce(Some(b"[1,2]".to_vec()))));
    }

    #[test]
    fn password_roundtrip_through_interceptors() {
        let mut attach = PasswordAttach::new(Some("secret")).unwrap();
        let mut check = PasswordCheck::new(Some("secret"));
        let request = attach.call(Request::new(())).unwrap();
        assert!(check.call(request).is_ok());

        let status = check.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(PasswordCheck::new(None).call(Request::new(())).is_ok());
    }
}
