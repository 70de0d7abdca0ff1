use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use taskline_core::api::{ApiError, ApiResult, ErrorKind, Remote, UsageCheck};
use taskline_core::category::{Category, NewCategory};
use taskline_core::entity::{Entity, is_temp_id};
use taskline_core::store::categories::USAGE_CHECK_MESSAGE;
use taskline_core::store::{
    CategoryStore, DeleteCategoryResult, LoadState, Outcome, TaskReplicaUsage, TaskStore,
};
use taskline_core::task::{NewTask, Task, TaskPatch};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    List,
    Create,
    Update(String),
    Delete(String),
}

#[derive(Debug)]
enum Reply<E> {
    List(ApiResult<Vec<E>>),
    One(ApiResult<E>),
    Unit(ApiResult<()>),
}

struct Gate<E> {
    call: Call,
    tx: oneshot::Sender<Reply<E>>,
}

impl<E: Debug> Gate<E> {
    fn reply(self, reply: Reply<E>) {
        let _ = self.tx.send(reply);
    }
}

/// Every call parks until the test releases it through its gate.
struct FakeRemote<E> {
    gates: Mutex<VecDeque<Gate<E>>>,
    calls: Mutex<Vec<Call>>,
}

impl<E: Entity> FakeRemote<E> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    async fn gate(&self) -> Gate<E> {
        for _ in 0..1_000 {
            if let Some(gate) = self.gates.lock().pop_front() {
                return gate;
            }
            tokio::task::yield_now().await;
        }
        panic!("no remote call was issued");
    }

    async fn wait(&self, call: Call, cancel: &CancellationToken) -> Option<Reply<E>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().push(call.clone());
        self.gates.lock().push_back(Gate { call, tx });
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            reply = rx => reply.ok(),
        }
    }
}

#[async_trait]
impl<E: Entity> Remote<E> for FakeRemote<E> {
    async fn list(&self, cancel: &CancellationToken) -> ApiResult<Vec<E>> {
        match self.wait(Call::List, cancel).await {
            Some(Reply::List(result)) => result,
            None => Err(ApiError::Aborted),
            Some(other) => panic!("unexpected reply to list: {other:?}"),
        }
    }

    async fn create(&self, _draft: &E::Draft, cancel: &CancellationToken) -> ApiResult<E> {
        match self.wait(Call::Create, cancel).await {
            Some(Reply::One(result)) => result,
            None => Err(ApiError::Aborted),
            Some(other) => panic!("unexpected reply to create: {other:?}"),
        }
    }

    async fn update(
        &self,
        id: &str,
        _patch: &E::Patch,
        cancel: &CancellationToken,
    ) -> ApiResult<E> {
        match self.wait(Call::Update(id.to_string()), cancel).await {
            Some(Reply::One(result)) => result,
            None => Err(ApiError::Aborted),
            Some(other) => panic!("unexpected reply to update: {other:?}"),
        }
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> ApiResult<()> {
        match self.wait(Call::Delete(id.to_string()), cancel).await {
            Some(Reply::Unit(result)) => result,
            None => Err(ApiError::Aborted),
            Some(other) => panic!("unexpected reply to delete: {other:?}"),
        }
    }
}

#[derive(Default)]
struct FakeUsage {
    answers: Mutex<VecDeque<ApiResult<bool>>>,
    calls: AtomicUsize,
}

impl FakeUsage {
    fn answering(answer: ApiResult<bool>) -> Arc<Self> {
        let usage = Self::default();
        usage.answers.lock().push_back(answer);
        Arc::new(usage)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageCheck for FakeUsage {
    async fn is_in_use(&self, _id: &str, _cancel: &CancellationToken) -> ApiResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .pop_front()
            .expect("usage answer scripted")
    }
}

fn server_error() -> ApiError {
    ApiError::Http {
        status: 500,
        message: "Internal Server Error".to_string(),
        details: None,
    }
}

fn task(id: &str, text: &str, order: i64) -> Task {
    let at = Utc.with_ymd_and_hms(2025, 8, 30, 2, 30, 34).unwrap();
    Task {
        id: id.to_string(),
        text: text.to_string(),
        completed: false,
        category_id: None,
        tags: vec![],
        order,
        created_at: at,
        updated_at: at,
    }
}

fn category(id: &str, name: &str) -> Category {
    let at = Utc.with_ymd_and_hms(2025, 8, 30, 2, 30, 34).unwrap();
    Category {
        id: id.to_string(),
        name: name.to_string(),
        color: "#1976d2".to_string(),
        created_at: at,
        updated_at: at,
    }
}

async fn loaded_tasks(remote: &Arc<FakeRemote<Task>>, items: Vec<Task>) -> TaskStore {
    let store = TaskStore::new(remote.clone());
    let load = tokio::spawn(store.activate().expect("first activation loads"));
    remote.gate().await.reply(Reply::List(Ok(items)));
    load.await.expect("load task");
    assert_eq!(store.load_state(), LoadState::Ready);
    store
}

async fn loaded_categories(
    remote: &Arc<FakeRemote<Category>>,
    usage: Arc<dyn UsageCheck>,
    items: Vec<Category>,
) -> CategoryStore {
    let store = CategoryStore::new(remote.clone(), usage);
    let load = tokio::spawn(store.activate().expect("first activation loads"));
    remote.gate().await.reply(Reply::List(Ok(items)));
    load.await.expect("load task");
    store
}

fn texts(store: &TaskStore) -> Vec<String> {
    store.tasks().into_iter().map(|t| t.text).collect()
}

#[tokio::test]
async fn load_happens_once_per_store() {
    let remote = FakeRemote::<Task>::new();
    let store = TaskStore::new(remote.clone());
    assert_eq!(store.load_state(), LoadState::Uninitialized);

    let first = store.activate().expect("first activation loads");
    assert!(store.activate().is_none());
    assert_eq!(store.load_state(), LoadState::Loading);

    let load = tokio::spawn(first);
    remote
        .gate()
        .await
        .reply(Reply::List(Ok(vec![task("1", "a", 0)])));
    load.await.expect("load task");

    assert!(store.activate().is_none());
    assert_eq!(store.tasks().len(), 1);
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn empty_collection_is_still_loaded() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![]).await;
    assert!(store.tasks().is_empty());
    assert_eq!(store.load_state(), LoadState::Ready);
}

#[tokio::test]
async fn create_is_visible_before_the_server_answers() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 4)]).await;

    let pending = store.create(NewTask {
        text: "Buy milk".to_string(),
        tags: vec!["home".to_string()],
        ..NewTask::default()
    });

    let optimistic = store.tasks();
    assert_eq!(optimistic.len(), 2);
    assert!(is_temp_id(&optimistic[1].id));
    assert_eq!(optimistic[1].text, "Buy milk");
    assert_eq!(optimistic[1].order, 5);
    assert!(!optimistic[1].completed);

    let settle = tokio::spawn(pending);
    let gate = remote.gate().await;
    assert_eq!(gate.call, Call::Create);
    gate.reply(Reply::One(Ok(task("42", "Buy milk", 0))));

    let outcome = settle.await.expect("create task");
    let created = match outcome {
        Outcome::Confirmed(task) => task,
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert_eq!(created.id, "42");
    assert_eq!(created.tags, vec!["home".to_string()]);
    assert_eq!(created.order, 5);
    assert_eq!(store.tasks()[1], created);
    assert_eq!(store.tasks().len(), 2);
}

#[tokio::test]
async fn failed_create_removes_the_temporary_entity() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![]).await;

    let settle = tokio::spawn(store.create(NewTask {
        text: "x".to_string(),
        ..NewTask::default()
    }));
    assert_eq!(store.tasks().len(), 1);

    remote.gate().await.reply(Reply::One(Err(server_error())));
    let outcome = settle.await.expect("create task");

    assert_eq!(outcome, Outcome::RolledBack(server_error()));
    assert!(store.tasks().is_empty());
    assert_eq!(
        store.error().expect("error recorded").message,
        "Failed to add task"
    );
}

#[tokio::test]
async fn stale_failure_after_newer_success_does_not_clobber() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let first = tokio::spawn(store.update(
        "1",
        TaskPatch {
            text: Some("b".to_string()),
            ..TaskPatch::default()
        },
    ));
    let first_gate = remote.gate().await;
    let second = tokio::spawn(store.update(
        "1",
        TaskPatch {
            text: Some("c".to_string()),
            ..TaskPatch::default()
        },
    ));
    let second_gate = remote.gate().await;
    assert_eq!(texts(&store), vec!["c"]);

    second_gate.reply(Reply::One(Ok(task("1", "c", 0))));
    assert!(second.await.expect("second update").is_confirmed());

    first_gate.reply(Reply::One(Err(server_error())));
    assert_eq!(first.await.expect("first update"), Outcome::Superseded);

    assert_eq!(texts(&store), vec!["c"]);
    assert!(store.error().is_none());
}

#[tokio::test]
async fn stale_failure_before_newer_success_does_not_clobber() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let first = tokio::spawn(store.toggle("1"));
    let first_gate = remote.gate().await;
    let second = tokio::spawn(store.update(
        "1",
        TaskPatch {
            text: Some("c".to_string()),
            ..TaskPatch::default()
        },
    ));
    let second_gate = remote.gate().await;

    first_gate.reply(Reply::One(Err(server_error())));
    assert_eq!(first.await.expect("first update"), Outcome::Superseded);
    assert_eq!(texts(&store), vec!["c"]);
    assert!(store.get("1").expect("task").completed);

    let mut confirmed = task("1", "c", 0);
    confirmed.completed = true;
    second_gate.reply(Reply::One(Ok(confirmed)));
    assert!(second.await.expect("second update").is_confirmed());

    assert_eq!(texts(&store), vec!["c"]);
    assert!(store.error().is_none());
}

#[tokio::test]
async fn latest_failed_update_restores_its_snapshot() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let settle = tokio::spawn(store.toggle("1"));
    assert!(store.get("1").expect("task").completed);

    remote.gate().await.reply(Reply::One(Err(server_error())));
    let outcome = settle.await.expect("update task");

    assert!(matches!(outcome, Outcome::RolledBack(_)));
    assert!(!store.get("1").expect("task").completed);
    assert_eq!(
        store.error().expect("error recorded").message,
        "Failed to update task"
    );
}

#[tokio::test]
async fn failed_update_keeps_later_reorder() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(
        &remote,
        vec![task("1", "a", 0), task("2", "b", 1), task("3", "c", 2)],
    )
    .await;

    let settle = tokio::spawn(store.toggle("1"));
    let gate = remote.gate().await;
    assert!(store.reorder("1", Some("3")));

    gate.reply(Reply::One(Err(server_error())));
    assert!(matches!(
        settle.await.expect("update task"),
        Outcome::RolledBack(_)
    ));

    let ids: Vec<String> = store.sorted().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["2", "3", "1"]);
    let mut orders: Vec<i64> = store.tasks().into_iter().map(|t| t.order).collect();
    orders.sort_unstable();
    assert_eq!(orders, vec![0, 1, 2]);
    assert!(!store.get("1").expect("task").completed);
}

#[tokio::test]
async fn failed_update_keeps_later_local_tags() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let settle = tokio::spawn(store.toggle("1"));
    let gate = remote.gate().await;
    let tagged = store
        .update(
            "1",
            TaskPatch {
                tags: Some(vec!["urgent".to_string()]),
                ..TaskPatch::default()
            },
        )
        .await;
    assert!(tagged.is_confirmed());

    gate.reply(Reply::One(Err(server_error())));
    settle.await.expect("update task");

    let task = store.get("1").expect("task");
    assert!(!task.completed);
    assert_eq!(task.tags, vec!["urgent".to_string()]);
}

#[tokio::test]
async fn cancelled_update_keeps_optimistic_state_silently() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let settle = tokio::spawn(store.toggle("1"));
    let _gate = remote.gate().await;
    assert_eq!(store.pending_count(), 1);

    store.cancel("1");
    assert_eq!(settle.await.expect("update task"), Outcome::Cancelled);

    assert!(store.get("1").expect("task").completed);
    assert!(store.error().is_none());
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test]
async fn cancelled_delete_does_not_restore() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0), task("2", "b", 1)]).await;

    let settle = tokio::spawn(store.delete("2"));
    let _gate = remote.gate().await;

    store.cancel("2");
    assert_eq!(settle.await.expect("delete task"), Outcome::Cancelled);

    assert_eq!(texts(&store), vec!["a"]);
    assert!(store.error().is_none());
}

#[tokio::test]
async fn cancelled_create_leaves_no_temporary_entity() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![]).await;

    let settle = tokio::spawn(store.create(NewTask {
        text: "x".to_string(),
        ..NewTask::default()
    }));
    let _gate = remote.gate().await;
    let temp_id = store.tasks()[0].id.clone();

    store.cancel(&temp_id);
    assert_eq!(settle.await.expect("create task"), Outcome::Cancelled);

    assert!(store.tasks().is_empty());
    assert!(store.error().is_none());
    assert_eq!(store.toggle(&temp_id).await, Outcome::Rejected);
    assert_eq!(remote.calls(), vec![Call::List, Call::Create]);
}

#[tokio::test]
async fn cancelled_category_rename_is_silent() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage, vec![category("1", "Work")]).await;

    let settle = tokio::spawn(store.rename("1", "Office", None));
    let _gate = remote.gate().await;

    store.cancel("1");
    assert_eq!(settle.await.expect("rename task"), Outcome::Cancelled);

    assert_eq!(store.categories()[0].name, "Office");
    assert!(store.error().is_none());
}

#[tokio::test]
async fn update_of_unknown_or_creating_id_is_rejected_locally() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![]).await;

    assert_eq!(
        store.update("nope", TaskPatch::completed(true)).await,
        Outcome::Rejected
    );

    let create = tokio::spawn(store.create(NewTask {
        text: "x".to_string(),
        ..NewTask::default()
    }));
    let temp_id = store.tasks()[0].id.clone();
    assert_eq!(store.toggle(&temp_id).await, Outcome::Rejected);
    assert_eq!(store.delete(&temp_id).await, Outcome::Rejected);

    remote
        .gate()
        .await
        .reply(Reply::One(Ok(task("9", "x", 0))));
    assert!(create.await.expect("create task").is_confirmed());
    assert_eq!(remote.calls(), vec![Call::List, Call::Create]);
}

#[tokio::test]
async fn empty_edit_is_rejected_without_change() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let outcome = store
        .edit(
            "1",
            taskline_core::task::EditTask {
                text: "   ".to_string(),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome, Outcome::Rejected);
    assert_eq!(texts(&store), vec!["a"]);
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn tag_only_patch_stays_local() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let outcome = store
        .update(
            "1",
            TaskPatch {
                tags: Some(vec!["urgent".to_string()]),
                ..TaskPatch::default()
            },
        )
        .await;

    assert!(outcome.is_confirmed());
    assert!(store.get("1").expect("task").has_tag("urgent"));
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn failed_delete_restores_entity_in_place() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(
        &remote,
        vec![task("1", "a", 0), task("2", "b", 1), task("3", "c", 2)],
    )
    .await;

    let settle = tokio::spawn(store.delete("2"));
    assert_eq!(texts(&store), vec!["a", "c"]);

    let gate = remote.gate().await;
    assert_eq!(gate.call, Call::Delete("2".to_string()));
    gate.reply(Reply::Unit(Err(server_error())));
    let outcome = settle.await.expect("delete task");

    assert!(matches!(outcome, Outcome::RolledBack(_)));
    assert_eq!(texts(&store), vec!["a", "b", "c"]);
    assert_eq!(
        store.error().expect("error recorded").message,
        "Failed to delete task, please retry"
    );
}

#[tokio::test]
async fn successful_operation_clears_previous_error() {
    let remote = FakeRemote::<Task>::new();
    let store = loaded_tasks(&remote, vec![task("1", "a", 0)]).await;

    let failing = tokio::spawn(store.toggle("1"));
    remote.gate().await.reply(Reply::One(Err(server_error())));
    failing.await.expect("update task");
    assert!(store.error().is_some());

    let deleting = tokio::spawn(store.delete("1"));
    remote.gate().await.reply(Reply::Unit(Ok(())));
    assert!(deleting.await.expect("delete task").is_confirmed());

    assert!(store.error().is_none());
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn torn_down_load_applies_nothing_and_reports_nothing() {
    let remote = FakeRemote::<Task>::new();
    let store = TaskStore::new(remote.clone());

    let load = tokio::spawn(store.activate().expect("first activation loads"));
    let gate = remote.gate().await;
    store.teardown();
    gate.reply(Reply::List(Ok(vec![task("1", "late", 0)])));
    load.await.expect("load task");

    assert!(store.tasks().is_empty());
    assert!(store.error().is_none());
    assert_ne!(store.load_state(), LoadState::Ready);
}

#[tokio::test]
async fn aborted_load_is_not_an_error() {
    let remote = FakeRemote::<Task>::new();
    let store = TaskStore::new(remote.clone());

    let load = tokio::spawn(store.activate().expect("first activation loads"));
    remote
        .gate()
        .await
        .reply(Reply::List(Err(ApiError::Aborted)));
    load.await.expect("load task");

    assert!(store.error().is_none());
}

#[tokio::test]
async fn failed_load_is_reported_with_offline_hint() {
    let remote = FakeRemote::<Task>::new();
    let (_offline_tx, offline_rx) = watch::channel(true);
    let store = TaskStore::new(remote.clone()).with_offline(offline_rx);

    let load = tokio::spawn(store.activate().expect("first activation loads"));
    remote
        .gate()
        .await
        .reply(Reply::List(Err(ApiError::Network("connection refused".to_string()))));
    load.await.expect("load task");

    let err = store.error().expect("error recorded");
    assert_eq!(err.kind, ErrorKind::Network);
    assert_eq!(err.message, "Failed to load tasks");
    assert!(err.offline);
    assert!(err.to_string().contains("offline"));
    assert_eq!(store.load_state(), LoadState::Ready);
}

#[tokio::test]
async fn load_settling_after_a_mutation_keeps_local_state() {
    let remote = FakeRemote::<Task>::new();
    let store = TaskStore::new(remote.clone());

    let load = tokio::spawn(store.activate().expect("first activation loads"));
    let load_gate = remote.gate().await;

    let create = tokio::spawn(store.create(NewTask {
        text: "early".to_string(),
        ..NewTask::default()
    }));

    load_gate.reply(Reply::List(Ok(vec![task("1", "server", 0)])));
    load.await.expect("load task");

    assert_eq!(texts(&store), vec!["early"]);
    assert_eq!(store.load_state(), LoadState::Ready);

    remote
        .gate()
        .await
        .reply(Reply::One(Ok(task("2", "early", 0))));
    assert!(create.await.expect("create task").is_confirmed());
}

#[tokio::test]
async fn duplicate_category_name_is_rejected_without_a_call() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage, vec![category("1", "Work")]).await;

    let outcome = store
        .create(NewCategory {
            name: "Work".to_string(),
            color: None,
        })
        .await;

    assert_eq!(outcome, Outcome::Rejected);
    assert_eq!(store.categories().len(), 1);
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn category_in_use_is_not_deleted() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(true));
    let store = loaded_categories(&remote, usage.clone(), vec![category("1", "Work")]).await;

    assert_eq!(store.delete("1").await, DeleteCategoryResult::InUse);

    assert_eq!(store.categories().len(), 1);
    assert!(store.error().is_none());
    assert_eq!(usage.calls(), 1);
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn failed_usage_check_blocks_delete_and_records_error() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Err(ApiError::Network("timeout".to_string())));
    let store = loaded_categories(&remote, usage, vec![category("1", "Work")]).await;

    assert_eq!(store.delete("1").await, DeleteCategoryResult::UsageCheckFailed);

    assert_eq!(store.categories().len(), 1);
    assert_eq!(
        store.error().expect("error recorded").message,
        USAGE_CHECK_MESSAGE
    );
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn unknown_category_is_not_found_without_calls() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage.clone(), vec![category("1", "Work")]).await;

    assert_eq!(store.delete("missing").await, DeleteCategoryResult::NotFound);

    assert_eq!(usage.calls(), 0);
    assert_eq!(remote.calls(), vec![Call::List]);
}

#[tokio::test]
async fn unused_category_is_deleted() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(
        &remote,
        usage,
        vec![category("1", "Work"), category("2", "Home")],
    )
    .await;

    let settle = tokio::spawn(store.delete("1"));
    let gate = remote.gate().await;
    assert_eq!(gate.call, Call::Delete("1".to_string()));
    assert_eq!(store.categories().len(), 1);
    gate.reply(Reply::Unit(Ok(())));

    assert_eq!(
        settle.await.expect("delete task"),
        DeleteCategoryResult::Success
    );
    assert_eq!(store.categories()[0].name, "Home");
}

#[tokio::test]
async fn failed_category_delete_reports_retry_message() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage, vec![category("1", "Work")]).await;

    let settle = tokio::spawn(store.delete("1"));
    remote.gate().await.reply(Reply::Unit(Err(server_error())));

    let message = "Failed to delete category, please retry".to_string();
    assert_eq!(
        settle.await.expect("delete task"),
        DeleteCategoryResult::Error(message.clone())
    );
    assert_eq!(store.categories().len(), 1);
    assert_eq!(store.error().expect("error recorded").message, message);
}

#[tokio::test]
async fn failed_rename_restores_name_only() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage, vec![category("1", "Work")]).await;

    let settle = tokio::spawn(store.rename("1", "Office", Some("#ff9800".to_string())));
    remote.gate().await.reply(Reply::One(Err(server_error())));
    assert!(matches!(
        settle.await.expect("rename task"),
        Outcome::RolledBack(_)
    ));

    let restored = store.get("1").expect("category");
    assert_eq!(restored.name, "Work");
    assert_eq!(restored.color, "#ff9800");
    assert_eq!(
        store.error().expect("error recorded").message,
        "Failed to update category"
    );
}

#[tokio::test]
async fn category_create_keeps_client_color() {
    let remote = FakeRemote::<Category>::new();
    let usage = FakeUsage::answering(Ok(false));
    let store = loaded_categories(&remote, usage, vec![]).await;

    let settle = tokio::spawn(store.create(NewCategory {
        name: "Errands".to_string(),
        color: Some("#ff9800".to_string()),
    }));
    remote
        .gate()
        .await
        .reply(Reply::One(Ok(category("5", "Errands"))));

    let created = match settle.await.expect("create task") {
        Outcome::Confirmed(category) => category,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(created.id, "5");
    assert_eq!(created.color, "#ff9800");
}

#[tokio::test]
async fn task_replica_answers_usage() {
    let task_remote = FakeRemote::<Task>::new();
    let mut linked = task("1", "a", 0);
    linked.category_id = Some("7".to_string());
    let tasks = loaded_tasks(&task_remote, vec![linked]).await;

    let remote = FakeRemote::<Category>::new();
    let store = loaded_categories(
        &remote,
        Arc::new(TaskReplicaUsage::new(tasks)),
        vec![category("7", "Work"), category("8", "Home")],
    )
    .await;

    assert_eq!(store.delete("7").await, DeleteCategoryResult::InUse);

    let settle = tokio::spawn(store.delete("8"));
    remote.gate().await.reply(Reply::Unit(Ok(())));
    assert_eq!(
        settle.await.expect("delete task"),
        DeleteCategoryResult::Success
    );
}

#[tokio::test]
async fn reorder_and_sort_are_local_and_dense() {
    let remote = FakeRemote::<Task>::new();
    let mut tasks = vec![task("1", "b", 10), task("2", "a", 20), task("3", "c", 30)];
    for (minutes, task) in (0_i64..).zip(tasks.iter_mut()) {
        task.created_at += chrono::Duration::minutes(minutes);
    }
    let store = loaded_tasks(&remote, tasks).await;

    assert!(store.reorder("3", Some("1")));
    let ids: Vec<String> = store.sorted().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["3", "1", "2"]);
    let mut orders: Vec<i64> = store.tasks().into_iter().map(|t| t.order).collect();
    orders.sort_unstable();
    assert_eq!(orders, vec![0, 1, 2]);

    assert!(!store.reorder("1", None));

    store.sort_by(taskline_core::order::SortCriterion::Alphabetical);
    let texts: Vec<String> = store.sorted().into_iter().map(|t| t.text).collect();
    assert_eq!(texts, vec!["a", "b", "c"]);

    store.reset_order();
    let ids: Vec<String> = store.sorted().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);

    assert_eq!(remote.calls(), vec![Call::List]);
}
