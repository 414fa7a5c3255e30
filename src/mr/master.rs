use std::{pin::Pin, sync::Arc, time::Instant};

use futures::{FutureExt, future::Shared};
use tokio::{net::{TcpListener, UnixListener}, sync::{Mutex, oneshot}, time};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::{Request, Response, Status, async_trait, codegen::InterceptedService, transport::Server};

use super::{
    Record,
    aggregator::FinalResults,
    job::Job,
    monitor::{MIN_PERIOD, StaleAssignmentMonitor},
    rpc::{self, MAX_MESSAGE_SIZE, MasterAddr, PasswordCheck, Report, proto},
    session::{ReportOutcome, SessionError},
};
use crate::config::MasterConfig;

type ShutdownFuture = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

#[derive(Clone)]
struct MasterServer {
    job: Arc<Mutex<Job>>,
    shutdown_receiver: ShutdownFuture,
    password: PasswordCheck,
}

#[async_trait]
impl proto::master_server::Master for MasterServer {
    async fn register(&self, request: Request<rpc::RegisterRequest>) -> Result<Response<rpc::RegisterReply>, Status> {
        let name = request.into_inner().name;
        let client_id = self.job.lock().await.new_client_id(Instant::now());
        log::info!("Worker#{} registered ({})", client_id, name);
        Ok(Response::new(rpc::RegisterReply { client_id }))
    }

    async fn poll(&self, request: Request<rpc::PollRequest>) -> Result<Response<rpc::PollReply>, Status> {
        let client_id = request.into_inner().client_id;
        let outcome = self.job.lock().await.poll(client_id, Instant::now());
        log::trace!("Worker#{} polled: {:?}", client_id, outcome);
        Ok(Response::new(outcome.into()))
    }

    async fn report(&self, request: Request<rpc::ReportRequest>) -> Result<Response<rpc::ReportReply>, Status> {
        let request = request.into_inner();
        let (client_id, task_id) = (request.client_id, request.task_id);
        let report = match request.output {
            Some(output) => Report::try_from(output)?,
            None => return Err(Status::invalid_argument(format!("report for task#{} has no output", task_id))),
        };

        let outcome = {
            let mut job = self.job.lock().await;
            match report {
                Report::Output(output) => job.report(client_id, task_id, output, Instant::now()),
                Report::Failed(reason) => job.fail(client_id, task_id, &reason, Instant::now()),
            }
        };
        match outcome {
            Ok(outcome) => {
                log::debug!("Worker#{} reported task#{}: {:?}", client_id, task_id, outcome);
                Ok(Response::new(rpc::ReportReply { accepted: outcome == ReportOutcome::Applied }))
            }
            Err(e) => {
                log::warn!("Rejected report from worker#{}: {}", client_id, e);
                Err(session_status(e))
            }
        }
    }

    async fn goodbye(&self, request: Request<rpc::GoodbyeRequest>) -> Result<Response<rpc::Ack>, Status> {
        self.job.lock().await.end_session(request.into_inner().client_id);
        Ok(Response::new(rpc::Ack {}))
    }
}

fn session_status(e: SessionError) -> Status {
    match e {
        SessionError::UnknownTask(_) => Status::not_found(e.to_string()),
        SessionError::OutputMismatch { .. } => Status::invalid_argument(e.to_string()),
    }
}

impl MasterServer {
    fn new<F>(job: Arc<Mutex<Job>>, shutdown_receiver: F, password: PasswordCheck) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown_receiver = (
            Box::pin(shutdown_receiver) as
                Pin<Box<dyn Future<Output = ()> + Send>>
        ).shared();
        Self { job, shutdown_receiver, password }
    }

    fn service(&self) -> InterceptedService<proto::master_server::MasterServer<MasterServer>, PasswordCheck> {
        let server = proto::master_server::MasterServer::new(self.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        InterceptedService::new(server, self.password.clone())
    }

    async fn run(&self, addr: &MasterAddr) -> Result<(), anyhow::Error> {
        match addr {
            MasterAddr::Tcp(addr) => {
                let listener = TcpListener::bind(*addr).await?;
                log::info!("Master listening on {}", listener.local_addr()?);
                Server::builder()
                    .add_service(self.service())
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), self.shutdown_receiver.clone())
                    .await?;
            }
            MasterAddr::Unix(path) => {
                // a socket file left over from an earlier run
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                log::info!("Master listening on {}", addr);
                Server::builder()
                    .add_service(self.service())
                    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), self.shutdown_receiver.clone())
                    .await?;
                let _ = std::fs::remove_file(path);
            }
        }
        log::info!("Master exiting");
        Ok(())
    }
}

pub struct Master {
    config: MasterConfig,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Master { config }
    }

    /// Runs one job to completion and returns its results.
    pub async fn run(&self, records: Vec<Record>) -> Result<FinalResults, anyhow::Error> {
        log::info!("Number of input records: {}", records.len());
        let (results_sender, results_receiver) = oneshot::channel();
        let job = Job::new(records, results_sender, self.config.report_interval)?;
        let job = Arc::new(Mutex::new(job));

        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let shutdown_receiver = async move {
            shutdown_receiver.await.unwrap_or(())
        };
        let server = MasterServer::new(job.clone(), shutdown_receiver, PasswordCheck::new(self.config.password.as_deref()));
        let monitor = StaleAssignmentMonitor::new(job.clone(), self.config.poll_interval, self.config.timeout);

        let (_, _, results) = tokio::try_join!(
            server.run(&self.config.address),
            async {
                monitor.run(server.shutdown_receiver.clone()).await;
                Ok::<_, anyhow::Error>(())
            },
            master_task(&self.config, job, results_receiver, shutdown_sender),
        )?;
        Ok(results)
    }
}

/// Waits for the job to finish, lets clients see JOB_DONE, then stops the server.
async fn master_task(
    config: &MasterConfig,
    job: Arc<Mutex<Job>>,
    results: oneshot::Receiver<FinalResults>,
    shutdown_sender: oneshot::Sender<()>,
) -> Result<FinalResults, anyhow::Error> {
    let results = results.await?;
    log::info!("Mapreduce done with {} results", results.len());

    let lingering = async {
        loop {
            if job.lock().await.client_count() == 0 {
                break;
            }
            time::sleep(config.poll_interval.min(config.linger).max(MIN_PERIOD)).await;
        }
    };
    if time::timeout(config.linger, lingering).await.is_err() {
        log::info!("Clients still attached after {:?}, shutting down anyway", config.linger);
    }
    let _ = shutdown_sender.send(());
    Ok(results)
}
