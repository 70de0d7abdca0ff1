use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, HttpCategoryApi, HttpTodoApi};
use crate::category::NewCategory;
use crate::cli::{AddArgs, CategoryCommand, Command, EditArgs, FilterArgs, FilterCommand};
use crate::config::Config;
use crate::filter::{FilterDescriptor, FilterUpdate};
use crate::network::{self, ReachabilityProbe, ReachabilityTracker, TcpProbe};
use crate::prefs::{self, JsonFileStore, KeyValueStore};
use crate::render::{Renderer, StatusReport};
use crate::store::categories::{CATEGORY_MESSAGES, USAGE_CHECK_MESSAGE};
use crate::store::tasks::TASK_MESSAGES;
use crate::store::{CategoryStore, DeleteCategoryResult, LoadState, Outcome, TaskStore};
use crate::task::{EditTask, NewTask, TaskPatch};
use crate::view;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Everything one CLI invocation works against.
pub struct Session {
    pub tasks: TaskStore,
    pub categories: CategoryStore,
    pub tracker: Arc<ReachabilityTracker>,
    api_url: String,
    prefs: Box<dyn KeyValueStore + Send>,
    renderer: Renderer,
    background: Vec<JoinHandle<()>>,
}

impl Session {
    #[instrument(skip(cfg, data_dir))]
    pub async fn open(cfg: &Config, data_dir: &Path) -> anyhow::Result<Self> {
        let api_url = cfg.api_base_url();
        let client = Arc::new(ApiClient::new(&api_url, cfg.api_timeout()?)?);
        let todo_api = Arc::new(HttpTodoApi::new(Arc::clone(&client)));
        let category_api = Arc::new(HttpCategoryApi::new(client));

        let probe: Arc<dyn ReachabilityProbe> =
            Arc::new(TcpProbe::from_base_url(&api_url, PROBE_TIMEOUT)?);
        let seed_probe = Arc::clone(&probe);
        let tracker = tokio::task::spawn_blocking(move || ReachabilityTracker::new(seed_probe))
            .await
            .context("reachability probe failed")?;
        let tracker = Arc::new(tracker);

        let (events_tx, events_rx) = network::network_events();
        let background = vec![
            tracker.listen(events_rx).await,
            network::spawn_poller(probe, cfg.probe_interval()?, events_tx),
        ];

        let tasks = TaskStore::new(todo_api).with_offline(tracker.subscribe());
        let categories = CategoryStore::new(category_api.clone(), category_api)
            .with_offline(tracker.subscribe());

        let prefs = JsonFileStore::open(data_dir)
            .with_context(|| format!("failed to open prefs in {}", data_dir.display()))?;

        info!(api = %api_url, offline = tracker.is_offline(), "session opened");

        Ok(Self {
            tasks,
            categories,
            tracker,
            api_url,
            prefs: Box::new(prefs),
            renderer: Renderer::new(cfg),
            background,
        })
    }

    /// Runs both initial loads and re-applies saved client-only task fields.
    #[instrument(skip(self))]
    pub async fn load(&self) {
        let pending: Vec<_> = [self.tasks.activate(), self.categories.activate()]
            .into_iter()
            .flatten()
            .collect();
        futures::future::join_all(pending).await;

        if self.tasks.load_state() == LoadState::Ready && self.tasks.error().is_none() {
            let overlay = prefs::load_overlay(&*self.prefs);
            if self.tasks.restore_local_fields(&overlay) {
                debug!(saved = overlay.len(), "restored local task fields");
            }
        }
        if self.categories.load_state() == LoadState::Ready && self.categories.error().is_none() {
            let colors = prefs::load_category_colors(&*self.prefs);
            if self.categories.restore_colors(&colors) {
                debug!(saved = colors.len(), "restored category colors");
            }
        }
    }

    /// Fails when the task collection could not be loaded.
    fn require_tasks(&self) -> anyhow::Result<()> {
        match self.tasks.error() {
            Some(err) => Err(anyhow!("{err}")),
            None => Ok(()),
        }
    }

    fn require_categories(&self) -> anyhow::Result<()> {
        match self.categories.error() {
            Some(err) => Err(anyhow!("{err}")),
            None => Ok(()),
        }
    }

    /// Persists the client-only task fields.
    fn save_local_fields(&mut self) -> anyhow::Result<()> {
        let overlay = self.tasks.local_fields();
        prefs::save_overlay(&mut *self.prefs, &overlay)
    }

    fn save_category_colors(&mut self) -> anyhow::Result<()> {
        let colors = self.categories.colors();
        prefs::save_category_colors(&mut *self.prefs, &colors)
    }

    fn saved_filters(&self) -> FilterDescriptor {
        prefs::load_filters(&*self.prefs)
    }

    /// Accepts a category id or an exact category name.
    fn resolve_category(&self, key: &str) -> String {
        if self.categories.get(key).is_some() {
            return key.to_string();
        }
        match self.categories.find_by_name(key) {
            Some(category) => category.id,
            None => key.to_string(),
        }
    }

    pub fn close(self) {
        self.tasks.teardown();
        self.categories.teardown();
        for handle in self.background {
            handle.abort();
        }
    }
}

#[instrument(skip(session, command))]
pub async fn dispatch(session: &mut Session, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    if !matches!(command, Command::Filter(_)) {
        session.load().await;
    }

    match command {
        Command::Status => cmd_status(session),
        Command::List(args) => cmd_list(session, args.filters),
        Command::Tags => {
            session.require_tasks()?;
            let tags = view::available_tags(&session.tasks.tasks());
            session.renderer.print_tags(&tags)
        }
        Command::Add(args) => cmd_add(session, args).await,
        Command::Done { id } => cmd_set_completed(session, &id, true).await,
        Command::Undo { id } => cmd_set_completed(session, &id, false).await,
        Command::Toggle { id } => cmd_toggle(session, &id).await,
        Command::Edit(args) => cmd_edit(session, args).await,
        Command::Rm { id } => cmd_rm(session, &id).await,
        Command::Move { source, target } => cmd_move(session, &source, target.as_deref()),
        Command::Sort { by } => {
            session.require_tasks()?;
            session.tasks.sort_by(by);
            session.save_local_fields()?;
            println!("Sorted tasks by {by:?}.");
            Ok(())
        }
        Command::Categories(cmd) => cmd_categories(session, cmd).await,
        Command::Filter(cmd) => cmd_filter(session, cmd),
    }
}

fn confirmed<T>(outcome: Outcome<T>, failure: &str) -> anyhow::Result<T> {
    match outcome {
        Outcome::Confirmed(value) => Ok(value),
        Outcome::RolledBack(err) => Err(anyhow::Error::new(err).context(failure.to_string())),
        Outcome::Rejected => Err(anyhow!("{failure}: rejected (unknown id or invalid input)")),
        Outcome::Superseded => Err(anyhow!("{failure}: superseded by a newer change")),
        Outcome::Cancelled => Err(anyhow!("{failure}: cancelled")),
    }
}

fn filter_update(session: &Session, args: FilterArgs) -> FilterUpdate {
    let non_empty = |items: Vec<String>| -> Option<BTreeSet<String>> {
        (!items.is_empty()).then(|| items.into_iter().collect())
    };
    let categories: Vec<String> = args
        .categories
        .iter()
        .map(|key| session.resolve_category(key))
        .collect();

    FilterUpdate {
        completion_status: args.status,
        category_ids: non_empty(categories),
        tags: non_empty(args.tags),
        tag_condition: args.tag_condition,
        search_text: args.search,
    }
}

#[instrument(skip(session, args))]
fn cmd_list(session: &Session, args: FilterArgs) -> anyhow::Result<()> {
    info!("command list");
    session.require_tasks()?;

    let mut filters = session.saved_filters();
    filters.update(filter_update(session, args));

    let visible = session.tasks.visible(&filters);
    session
        .renderer
        .print_tasks(&visible, &session.categories.categories())
}

#[instrument(skip(session, args))]
async fn cmd_add(session: &mut Session, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");
    session.require_tasks()?;

    let text = args.text.join(" ");
    if text.trim().is_empty() {
        bail!("task text cannot be empty");
    }

    let draft = NewTask {
        text: text.trim().to_string(),
        category_id: args.category.as_deref().map(|key| session.resolve_category(key)),
        tags: args.tags,
        completed: args.done,
    };

    let task = confirmed(session.tasks.create(draft).await, TASK_MESSAGES.create)?;
    session.save_local_fields()?;

    println!("Created task {}.", task.id);
    Ok(())
}

#[instrument(skip(session))]
async fn cmd_set_completed(session: &mut Session, id: &str, completed: bool) -> anyhow::Result<()> {
    info!(completed, "command set completed");
    session.require_tasks()?;

    let outcome = session
        .tasks
        .update(id, TaskPatch::completed(completed))
        .await;
    let task = confirmed(outcome, TASK_MESSAGES.update)?;

    let state = if task.completed { "completed" } else { "open" };
    println!("Task {} is {state}.", task.id);
    Ok(())
}

#[instrument(skip(session))]
async fn cmd_toggle(session: &mut Session, id: &str) -> anyhow::Result<()> {
    info!("command toggle");
    session.require_tasks()?;

    let task = confirmed(session.tasks.toggle(id).await, TASK_MESSAGES.update)?;

    let state = if task.completed { "completed" } else { "open" };
    println!("Task {} is {state}.", task.id);
    Ok(())
}

#[instrument(skip(session, args))]
async fn cmd_edit(session: &mut Session, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");
    session.require_tasks()?;

    let current = session
        .tasks
        .get(&args.id)
        .ok_or_else(|| anyhow!("no task with id {}", args.id))?;

    let category_id = if args.no_category {
        None
    } else if let Some(key) = args.category.as_deref() {
        Some(session.resolve_category(key))
    } else {
        current.category_id.clone()
    };
    let tags = if args.clear_tags {
        Vec::new()
    } else if args.tags.is_empty() {
        current.tags.clone()
    } else {
        args.tags
    };

    let edit = EditTask {
        text: args.text.unwrap_or_else(|| current.text.clone()),
        category_id,
        tags,
    };

    let task = confirmed(session.tasks.edit(&args.id, edit).await, TASK_MESSAGES.update)?;
    session.save_local_fields()?;

    println!("Updated task {}.", task.id);
    Ok(())
}

#[instrument(skip(session))]
async fn cmd_rm(session: &mut Session, id: &str) -> anyhow::Result<()> {
    info!("command rm");
    session.require_tasks()?;

    confirmed(session.tasks.delete(id).await, TASK_MESSAGES.delete)?;
    session.save_local_fields()?;

    println!("Deleted task {id}.");
    Ok(())
}

#[instrument(skip(session))]
fn cmd_move(session: &mut Session, source: &str, target: Option<&str>) -> anyhow::Result<()> {
    info!("command move");
    session.require_tasks()?;

    if !session.tasks.reorder(source, target) {
        println!("Nothing to move.");
        return Ok(());
    }
    session.save_local_fields()?;

    println!("Moved task {source}.");
    Ok(())
}

#[instrument(skip(session, cmd))]
fn cmd_filter(session: &mut Session, cmd: FilterCommand) -> anyhow::Result<()> {
    info!("command filter");

    let filters = match cmd {
        FilterCommand::Show => session.saved_filters(),
        FilterCommand::Set(args) => {
            let mut filters = session.saved_filters();
            filters.update(filter_update(session, args));
            prefs::save_filters(&mut *session.prefs, &filters)?;
            filters
        }
        FilterCommand::Reset => {
            let mut filters = session.saved_filters();
            filters.reset();
            prefs::save_filters(&mut *session.prefs, &filters)?;
            filters
        }
    };

    session.renderer.print_filters(&filters)
}

#[instrument(skip(session, cmd))]
async fn cmd_categories(session: &mut Session, cmd: CategoryCommand) -> anyhow::Result<()> {
    info!("command categories");
    session.require_categories()?;

    match cmd {
        CategoryCommand::List => session
            .renderer
            .print_categories(&session.categories.categories()),
        CategoryCommand::Add { name, color } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("category name cannot be empty");
            }
            let outcome = session
                .categories
                .create(NewCategory {
                    name: name.clone(),
                    color,
                })
                .await;
            if matches!(outcome, Outcome::Rejected) {
                bail!("a category named {name:?} already exists");
            }
            let category = confirmed(outcome, CATEGORY_MESSAGES.create)?;
            session.save_category_colors()?;
            println!("Created category {} ({}).", category.id, category.name);
            Ok(())
        }
        CategoryCommand::Rename { id, name, color } => {
            let outcome = session.categories.rename(&id, name, color).await;
            let category = confirmed(outcome, CATEGORY_MESSAGES.update)?;
            session.save_category_colors()?;
            println!("Renamed category {} to {}.", category.id, category.name);
            Ok(())
        }
        CategoryCommand::Rm { id } => match session.categories.delete(&id).await {
            DeleteCategoryResult::Success => {
                session.save_category_colors()?;
                println!("Deleted category {id}.");
                Ok(())
            }
            DeleteCategoryResult::InUse => {
                bail!("category {id} is still used by tasks")
            }
            DeleteCategoryResult::UsageCheckFailed => match session.categories.error() {
                Some(err) => bail!("{err}"),
                None => bail!("{USAGE_CHECK_MESSAGE}"),
            },
            DeleteCategoryResult::NotFound => bail!("no category with id {id}"),
            DeleteCategoryResult::Error(message) => bail!("{message}"),
        },
    }
}

#[instrument(skip(session))]
fn cmd_status(session: &Session) -> anyhow::Result<()> {
    info!("command status");

    let errors = [session.tasks.error(), session.categories.error()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    if !errors.is_empty() {
        warn!(count = errors.len(), "stores reported errors");
    }

    let report = StatusReport {
        api_url: session.api_url.clone(),
        offline: session.tracker.is_offline(),
        tasks: (session.tasks.load_state(), session.tasks.tasks().len()),
        categories: (
            session.categories.load_state(),
            session.categories.categories().len(),
        ),
        errors,
    };
    session.renderer.print_status(&report)
}
