use clap::Parser;
use jdash_client::config::{load_dashboard_config, PollerOptions};
use jdash_client::poller::{ControllerPoller, PollExit};
use jdash_client::registry::ConnectionRegistry;
use jdash_client::session::{controllers_to_poll, log_out, model_login_method, restore_additional_controllers};
use jdash_client::shared::StoreHandle;
use jdash_client::update::{checker_for, DEFAULT_RELEASE_FEED};
use jdash_client::watcher::{start_model_watcher, ModelWatchers};
use jdash_core::store::{Credential, Store, StoreAction};
use jdash_storage::SettingsStore;
use std::{
    fs::{File, OpenOptions},
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

#[derive(Clone, Debug)]
struct Config {
    dashboard_config: PathBuf,
    credential: Option<Credential>,
    settings_db: String,
    debug: bool,
    log_dir: String,
    poller: PollerOptions,
    watch: Vec<String>,
    dump_state: String,
    release_feed: String,
}

#[derive(Parser, Debug)]
#[command(name = "jdash-sync")]
struct Args {
    #[arg(long, default_value = "")]
    config: String,
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long, default_value = "")]
    settings_db: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 0)]
    poll_interval: u64,
    #[arg(long)]
    cycles: Option<usize>,
    /// Model uuids to follow with a live watcher.
    #[arg(long = "watch")]
    watch: Vec<String>,
    /// Write the final dashboard state as JSON on exit.
    #[arg(long, default_value = "")]
    dump_state: String,
    /// Release listing used when the config has no latestJujuVersion.
    #[arg(long, default_value = "")]
    release_feed: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);

    let dashboard = match load_dashboard_config(&config.dashboard_config) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "config_error", error = %err);
            return;
        }
    };
    let store = StoreHandle::new(Store::with_config(dashboard.clone()));
    let _ = store.dispatch(StoreAction::StoreVersion(env!("CARGO_PKG_VERSION").to_string()));

    let settings = open_settings(&config.settings_db);
    let additional = settings
        .as_ref()
        .map(|settings| restore_additional_controllers(settings, &store))
        .unwrap_or_default();
    let controllers = controllers_to_poll(&dashboard, config.credential.clone(), additional);
    if controllers.is_empty() {
        error!(event = "no_controllers", config = %config.dashboard_config.display());
        return;
    }

    let registry = ConnectionRegistry::new();
    let watchers = Arc::new(ModelWatchers::new());
    let checker = checker_for(dashboard.latest_juju_version.clone(), &config.release_feed);
    info!(event = "sync_start", controllers = controllers.len(), watch = config.watch.len());

    let revisions = tokio::spawn(log_revisions(store.clone()));
    for uuid in &config.watch {
        tokio::spawn(follow_model(
            store.clone(),
            registry.clone(),
            watchers.clone(),
            uuid.clone(),
            config.poller.clone(),
        ));
    }

    let poller = ControllerPoller::new(store.clone(), registry.clone(), checker, config.poller.clone());
    let pollers = async {
        for (url, exit) in poller.run_all(&controllers).await {
            match exit {
                PollExit::LoginFailed(err) => warn!(event = "poller_login_failed", url = %url, error = %err),
                exit => info!(event = "poller_exit", url = %url, exit = ?exit),
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!(event = "sync_interrupted"),
        _ = pollers => info!(event = "sync_pollers_done"),
    }

    if !config.dump_state.trim().is_empty() {
        dump_state(&store, &config.dump_state);
    }
    log_out(&store, &registry, &watchers, None).await;
    revisions.abort();
}

/// Start a watcher once the model shows up in a poll and its controller is
/// logged in.
async fn follow_model(
    store: StoreHandle,
    registry: Arc<ConnectionRegistry>,
    watchers: Arc<ModelWatchers>,
    model_uuid: String,
    options: PollerOptions,
) {
    let mut changes = store.subscribe();
    let ws_controller_url = loop {
        let ready = store.read(|state| {
            state
                .model_by_uuid(&model_uuid)
                .map(|model| model.ws_controller_url.clone())
                .filter(|url| state.is_logged_in(url))
        });
        if let Some(url) = ready {
            break url;
        }
        if changes.changed().await.is_err() {
            return;
        }
    };
    let Some(method) = model_login_method(&store, &registry, &ws_controller_url).await else {
        warn!(event = "watch_no_login_method", model_uuid = %model_uuid);
        return;
    };
    let handle = start_model_watcher(store, &ws_controller_url, &model_uuid, method, &options);
    info!(event = "watch_started", model_uuid = %model_uuid, url = %ws_controller_url);
    watchers.insert(handle).await;
}

async fn log_revisions(store: StoreHandle) {
    let mut changes = store.subscribe();
    while changes.changed().await.is_ok() {
        let revision = *changes.borrow_and_update();
        let (models, snapshots) = store.read(|state| {
            (state.juju.models.len(), state.juju.model_watcher_data.len())
        });
        debug!(event = "store_revision", revision = revision, models = models, snapshots = snapshots);
    }
}

fn dump_state(store: &StoreHandle, path: &str) {
    let state = store.snapshot();
    let written = serde_json::to_string_pretty(&state)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
        .and_then(|json| std::fs::write(path, json));
    match written {
        Ok(()) => info!(event = "state_dumped", path = path),
        Err(err) => warn!(event = "state_dump_failed", path = path, error = %err),
    }
}

fn open_settings(path: &str) -> Option<SettingsStore> {
    if path.trim().is_empty() {
        return None;
    }
    match SettingsStore::open(path) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!(event = "settings_open_failed", path = path, error = %err);
            None
        }
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    let user = resolve_flag(&args.user, "JDASH_USER", "");
    let password = resolve_flag(&args.password, "JDASH_PASSWORD", "");
    let credential = if user.is_empty() || password.is_empty() {
        None
    } else {
        Some(Credential { user, password })
    };
    let mut poller = PollerOptions {
        max_cycles: args.cycles,
        ..PollerOptions::default()
    };
    if args.poll_interval > 0 {
        poller.poll_interval = Duration::from_secs(args.poll_interval);
    }
    Config {
        dashboard_config: PathBuf::from(resolve_flag(&args.config, "JDASH_CONFIG", "config.json")),
        credential,
        settings_db: resolve_flag(&args.settings_db, "JDASH_SETTINGS_DB", ""),
        debug: args.debug || env_true("JDASH_DEBUG"),
        log_dir: resolve_flag(&args.log_dir, "JDASH_LOG_DIR", ".jdash/logs"),
        poller,
        watch: args.watch,
        dump_state: args.dump_state,
        release_feed: resolve_flag(&args.release_feed, "JDASH_RELEASE_FEED", DEFAULT_RELEASE_FEED),
    }
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else {
        std::env::var("JDASH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match open_log_file(&config.log_dir) {
        Some(file) => tracing::subscriber::set_global_default(
            builder.with_writer(io::stdout.and(Mutex::new(file))).finish(),
        ),
        None => tracing::subscriber::set_global_default(builder.with_writer(io::stdout).finish()),
    };
    if let Err(err) = installed {
        eprintln!("log_init_error: {err}");
    }
}

/// Appends to `<log_dir>/jdash-sync.log`; an empty dir disables the file.
fn open_log_file(log_dir: &str) -> Option<File> {
    if log_dir.trim().is_empty() {
        return None;
    }
    let dir = PathBuf::from(log_dir);
    let opened = std::fs::create_dir_all(&dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("jdash-sync.log"))
    });
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Flag, then environment, then default.
fn resolve_flag(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}
