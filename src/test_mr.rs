use std::{path::Path, time::Duration};

use serde_json::{Value, json};
use tokio::time;

use crate::{
    config::{MasterConfig, WorkerConfig},
    io::reader::{Lines, Reader},
    mr::{
        Mapper, Record, decode, encode,
        master::Master,
        rpc::{self, MasterAddr, PasswordAttach, Report},
        session::{Assignment, PollOutcome, TaskOutput},
        task_store::Payload,
        worker::{self, Client, Worker},
    },
    mrapps::{Sum, WordCount},
    mrrt::{local, sequential},
};

const TEXTS: &[&str] = &[
    "It was the best of times, it was the worst of times,\nit was the age of wisdom",
    "it was the age of foolishness, it was the epoch of belief",
    "",
    "It was the season of Light,\nit was the season of Darkness",
];

fn sock(dir: &Path) -> MasterAddr {
    MasterAddr::Unix(dir.join("mr.sock"))
}

fn master_config(address: MasterAddr) -> MasterConfig {
    MasterConfig {
        address,
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(50),
        linger: Duration::from_secs(2),
        ..MasterConfig::default()
    }
}

fn worker_config(address: MasterAddr) -> WorkerConfig {
    WorkerConfig {
        address,
        backoff: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(10),
        ..WorkerConfig::default()
    }
}

fn text_records(lines: &[&str]) -> Vec<Record> {
    lines.iter().map(|l| Record::new(None, &json!(l)).unwrap()).collect()
}

async fn raw_client(addr: &MasterAddr) -> Client {
    for _ in 0..250 {
        if let Ok(channel) = worker::connect(addr).await {
            return worker::new_client(channel, PasswordAttach::default());
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("master never came up at {}", addr);
}

async fn register(client: &mut Client) -> u64 {
    client.register(rpc::RegisterRequest { name: "test".into() }).await.unwrap().into_inner().client_id
}

async fn poll(client: &mut Client, client_id: u64) -> PollOutcome {
    let reply = client.poll(rpc::PollRequest { client_id }).await.unwrap().into_inner();
    PollOutcome::try_from(reply).unwrap()
}

fn map_pairs(pairs: &[(Value, Value)]) -> Report {
    Report::Output(TaskOutput::Map(
        pairs.iter().map(|(k, v)| (encode(k).unwrap(), encode(v).unwrap())).collect(),
    ))
}

fn word_count(task: &Assignment) -> Report {
    let Payload::Record(value) = &task.payload else { panic!("expected a map task") };
    let pairs: Vec<_> = WordCount.map(None, &decode(value).unwrap()).unwrap()
        .into_iter()
        .map(|kv| (kv.key, kv.value))
        .collect();
    map_pairs(&pairs)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distributed_word_count_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    for (i, text) in TEXTS.iter().enumerate() {
        std::fs::write(dir.path().join(format!("pg-{}.txt", i)), text).unwrap();
    }
    let records = Lines.read(&format!("{}/pg-*.txt", dir.path().display())).unwrap();
    let expected = sequential::run(&WordCount, &Sum, records.clone()).unwrap();

    let (results, stats) = local::run(
        master_config(sock(dir.path())),
        worker_config(sock(dir.path())),
        3,
        records.clone(),
    ).await.unwrap();

    assert_eq!(results.get(&json!("was")), Some(json!(7)));
    assert_eq!(results.get(&json!("It")), Some(json!(2)));
    assert_eq!(results.into_values().collect::<Vec<_>>(), expected.into_values().collect::<Vec<_>>());
    assert_eq!(stats.iter().map(|s| s.maps).sum::<usize>(), records.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_input_needs_no_workers() {
    let dir = tempfile::tempdir().unwrap();
    let config = MasterConfig { linger: Duration::from_millis(200), ..master_config(sock(dir.path())) };
    let (results, _) = local::run(config, worker_config(sock(dir.path())), 2, vec![]).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_client_loses_its_task() {
    let dir = tempfile::tempdir().unwrap();
    let addr = sock(dir.path());
    let master = Master::new(master_config(addr.clone()));
    let job = tokio::spawn(async move { master.run(text_records(&["x x", "y"])).await });

    let mut x = raw_client(&addr).await;
    let x_id = register(&mut x).await;
    let PollOutcome::Task(task) = poll(&mut x, x_id).await else { panic!("x should get a task") };

    // past the 200ms timeout, so the monitor hands the task back
    time::sleep(Duration::from_millis(600)).await;

    let mut y = raw_client(&addr).await;
    let y_id = register(&mut y).await;
    let PollOutcome::Task(again) = poll(&mut y, y_id).await else { panic!("y should get a task") };
    assert_eq!(again.task_id, task.task_id);
    let reply = y.report(word_count(&again).into_request(y_id, again.task_id)).await.unwrap();
    assert!(reply.into_inner().accepted);

    let late = map_pairs(&[(json!("bogus"), json!(1))]);
    let reply = x.report(late.into_request(x_id, task.task_id)).await.unwrap();
    assert!(!reply.into_inner().accepted);

    x.goodbye(rpc::GoodbyeRequest { client_id: x_id }).await.unwrap();
    y.goodbye(rpc::GoodbyeRequest { client_id: y_id }).await.unwrap();

    let stats = Worker::from_config(worker_config(addr)).unwrap().run().await.unwrap();
    assert_eq!((stats.maps, stats.reduces), (1, 2));

    let results: Vec<_> = job.await.unwrap().unwrap().into_values().collect();
    assert_eq!(results, vec![(json!("x"), json!(2)), (json!("y"), json!(1))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let addr = sock(dir.path());
    let config = MasterConfig { password: Some("secret".into()), ..master_config(addr.clone()) };
    let job = tokio::spawn(async move { Master::new(config).run(text_records(&["a"])).await });

    let intruder = WorkerConfig { password: Some("guess".into()), ..worker_config(addr.clone()) };
    assert!(Worker::from_config(intruder).unwrap().run().await.is_err());

    let friend = WorkerConfig { password: Some("secret".into()), ..worker_config(addr) };
    let stats = Worker::from_config(friend).unwrap().run().await.unwrap();
    assert_eq!(stats.maps, 1);

    let results = job.await.unwrap().unwrap();
    assert_eq!(results.get(&json!("a")), Some(json!(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outputs_beyond_default_grpc_limit() {
    let dir = tempfile::tempdir().unwrap();
    // ~6 MB of map output, and a reduce group just as large
    let text = "a ".repeat(600_000);
    let config = MasterConfig { timeout: Duration::from_secs(30), ..master_config(sock(dir.path())) };
    let run = local::run(config, worker_config(sock(dir.path())), 1, text_records(&[&text]));

    let (results, stats) = time::timeout(Duration::from_secs(60), run).await
        .expect("job should finish")
        .unwrap();
    assert_eq!(results.get(&json!("a")), Some(json!(600_000)));
    assert_eq!(stats.iter().map(|s| s.failures).sum::<usize>(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_poll_interval_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = MasterConfig {
        poll_interval: Duration::ZERO,
        linger: Duration::from_millis(100),
        ..master_config(sock(dir.path()))
    };
    let results = time::timeout(Duration::from_secs(10), Master::new(config).run(vec![])).await
        .expect("master should stop")
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_result_can_be_handed_back() {
    let dir = tempfile::tempdir().unwrap();
    let addr = sock(dir.path());
    let config = MasterConfig { timeout: Duration::from_secs(30), ..master_config(addr.clone()) };
    let job = tokio::spawn(async move { Master::new(config).run(text_records(&["z"])).await });

    let mut x = raw_client(&addr).await;
    let x_id = register(&mut x).await;
    let PollOutcome::Task(task) = poll(&mut x, x_id).await else { panic!("x should get a task") };

    let malformed = rpc::ReportRequest {
        client_id: x_id,
        task_id: task.task_id,
        output: Some(rpc::report_request::Output::Map(rpc::MapOutput {
            pairs: vec![rpc::Pair { key: b"{oops".to_vec(), value: b"1".to_vec() }],
        })),
    };
    let status = x.report(malformed).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let mut y = raw_client(&addr).await;
    let y_id = register(&mut y).await;
    assert_eq!(poll(&mut y, y_id).await, PollOutcome::Wait);

    let give_back = Report::Failed("result rejected".into()).into_request(x_id, task.task_id);
    assert!(x.report(give_back).await.unwrap().into_inner().accepted);
    let PollOutcome::Task(again) = poll(&mut y, y_id).await else { panic!("y should get the task back") };
    assert_eq!(again.task_id, task.task_id);
    assert!(y.report(word_count(&again).into_request(y_id, again.task_id)).await.unwrap().into_inner().accepted);

    x.goodbye(rpc::GoodbyeRequest { client_id: x_id }).await.unwrap();
    y.goodbye(rpc::GoodbyeRequest { client_id: y_id }).await.unwrap();
    Worker::from_config(worker_config(addr)).unwrap().run().await.unwrap();

    let results = job.await.unwrap().unwrap();
    assert_eq!(results.get(&json!("z")), Some(json!(1)));
}
