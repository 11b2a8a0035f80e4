mod common;

use common::{commit, FakeVcs, RecordingSink};
use gitwatch::adapters::MemoryStore;
use gitwatch::services::Monitor;
use gitwatch_core::app::Command;
use gitwatch_core::domain::RepoOptions;
use gitwatch_core::ports::{MonitorConfig, RepoStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    _temp_dir: TempDir,
    vcs: Arc<FakeVcs>,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    monitor: Monitor,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::new());
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let config = MonitorConfig {
        repo_dir: temp_dir.path().to_path_buf(),
        poll_period_secs: 0,
        ..MonitorConfig::default()
    };
    let monitor = Monitor::new(config, vcs.clone(), store.clone(), sink.clone()).unwrap();
    Fixture {
        _temp_dir: temp_dir,
        vcs,
        store,
        sink,
        monitor,
    }
}

fn add_repo(name: &str, target: &str, reply_to: &str) -> Command {
    Command::AddRepository {
        name: name.to_string(),
        url: format!("{}-url", name),
        targets: vec![target.to_string()],
        branches: None,
        reply_to: reply_to.to_string(),
    }
}

fn add_docs(reply_to: &str) -> Command {
    add_repo("docs", "#docs", reply_to)
}

fn poll(name: Option<&str>, force: bool, reply_to: &str) -> Command {
    Command::Poll {
        name: name.map(str::to_string),
        force,
        reply_to: reply_to.to_string(),
    }
}

/// `with_docs` plus `guide` (announced on #guide), both at commit 1
async fn with_docs_and_guide() -> Fixture {
    let mut fx = with_docs().await;
    fx.vcs.add_remote("guide-url", "main", vec![commit(1, "Ada", "Initial import")]);
    fx.monitor.handle_command(add_repo("guide", "#guide", "#guide"));
    fx.monitor.drain().await;
    fx.sink.take("#guide");
    fx
}

fn pushed_lines(lines: &[String]) -> Vec<&str> {
    lines
        .iter()
        .map(String::as_str)
        .filter(|line| line.contains(" pushed "))
        .collect()
}

/// Fixture with `docs` (branch main at commit 1) already tracked
async fn with_docs() -> Fixture {
    let mut fx = fixture();
    fx.vcs.add_remote("docs-url", "main", vec![commit(1, "Ada", "Initial import")]);
    fx.monitor.handle_command(add_docs("#docs"));
    fx.monitor.drain().await;
    fx.sink.take("#docs");
    fx
}

#[tokio::test]
async fn test_add_repository_clones_and_persists() {
    let mut fx = fixture();
    fx.vcs.add_remote("docs-url", "main", vec![commit(1, "Ada", "Initial import")]);

    fx.monitor.handle_command(add_docs("#admin"));
    assert_eq!(fx.sink.take("#admin"), vec!["Cloning of docs started..."]);
    assert!(fx.monitor.is_busy());

    fx.monitor.drain().await;
    assert_eq!(fx.sink.take("#admin"), vec!["Repository docs created and cloned"]);
    assert_eq!(fx.monitor.registry().names(), vec!["docs"]);
    assert_eq!(fx.store.load_repository_names().unwrap(), vec!["docs"]);

    let docs = fx.monitor.registry().get("docs").unwrap();
    assert_eq!(docs.cursor("main"), Some(commit(1, "Ada", "").id));
}

#[tokio::test]
async fn test_duplicate_add_leaves_membership_unchanged() {
    let mut fx = with_docs().await;

    fx.monitor.handle_command(add_docs("#docs"));
    assert_eq!(fx.sink.take("#docs"), vec!["Error: Repository already exists: docs"]);
    assert!(!fx.monitor.is_busy());
    assert_eq!(fx.monitor.registry().names(), vec!["docs"]);
    assert_eq!(fx.store.load_repository_names().unwrap(), vec!["docs"]);
}

#[tokio::test]
async fn test_failed_clone_is_reported_and_not_tracked() {
    let mut fx = fixture();
    fx.vcs.add_remote("docs-url", "main", vec![commit(1, "Ada", "Initial import")]);
    fx.vcs.set_unreachable("docs-url");

    fx.monitor.handle_command(add_docs("#docs"));
    fx.monitor.drain().await;

    let replies = fx.sink.take("#docs");
    assert_eq!(replies.len(), 2);
    assert!(replies[1].starts_with("Error: Cannot clone repo: "), "{}", replies[1]);
    assert!(fx.monitor.registry().names().is_empty());
    assert!(fx.store.load_repository_names().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_poll_announces_and_replies() {
    let mut fx = with_docs().await;
    fx.vcs.push("docs-url", "main", vec![commit(2, "Grace", "Add chapter")]);

    fx.monitor.handle_command(Command::Poll {
        name: None,
        force: false,
        reply_to: "#docs".to_string(),
    });
    fx.monitor.drain().await;

    let lines = fx.sink.take("#docs");
    assert_eq!(lines.first().map(String::as_str), Some("Grace pushed 1 commit(s) to main at docs"));
    assert!(lines[1].contains("Add chapter"));
    assert_eq!(lines.last().map(String::as_str), Some("The operation succeeded."));

    // nothing new on the second poll
    fx.monitor.handle_command(Command::Poll {
        name: None,
        force: false,
        reply_to: "#docs".to_string(),
    });
    fx.monitor.drain().await;
    assert_eq!(fx.sink.take("#docs"), vec!["The operation succeeded."]);
}

#[tokio::test]
async fn test_manual_poll_reports_errors() {
    let mut fx = with_docs().await;
    fx.vcs.set_timeout("docs-url", true);

    fx.monitor.handle_command(Command::Poll {
        name: None,
        force: true,
        reply_to: "#docs".to_string(),
    });
    fx.monitor.drain().await;

    assert_eq!(fx.sink.take("#docs"), vec!["Error: Timeout while fetching docs/*"]);
}

#[tokio::test]
async fn test_repository_commands_check_subscription() {
    let mut fx = with_docs().await;

    fx.monitor.handle_command(Command::RepoStat {
        name: "docs".to_string(),
        reply_to: "#other".to_string(),
    });
    assert_eq!(fx.sink.take("#other"), vec!["Sorry, not allowed in this channel."]);

    fx.monitor.handle_command(Command::RepoStat {
        name: "ghost".to_string(),
        reply_to: "#docs".to_string(),
    });
    assert_eq!(fx.sink.take("#docs"), vec!["No repository named ghost"]);

    fx.monitor.handle_command(Command::RepoStat {
        name: "docs".to_string(),
        reply_to: "#docs".to_string(),
    });
    assert_eq!(fx.sink.take("#docs"), vec!["Watched branches: main"]);
}

#[tokio::test]
async fn test_list_repositories_per_target() {
    let mut fx = with_docs().await;

    fx.monitor.handle_command(Command::ListRepositories {
        reply_to: "#docs".to_string(),
    });
    assert_eq!(fx.sink.take("#docs"), vec!["docs  docs-url  1 branch(es)"]);

    fx.monitor.handle_command(Command::ListRepositories {
        reply_to: "#other".to_string(),
    });
    assert_eq!(
        fx.sink.take("#other"),
        vec!["No repositories configured for this channel."]
    );
}

#[tokio::test]
async fn test_repo_log_shows_latest_commits() {
    let mut fx = with_docs().await;
    fx.vcs.push("docs-url", "main", vec![commit(2, "Ada", "two"), commit(3, "Ada", "three")]);
    fx.monitor.handle_command(Command::Poll {
        name: None,
        force: false,
        reply_to: "#docs".to_string(),
    });
    fx.monitor.drain().await;
    fx.sink.take("#docs");

    fx.monitor.handle_command(Command::RepoLog {
        name: "docs".to_string(),
        branch: "main".to_string(),
        count: 2,
        reply_to: "#docs".to_string(),
    });
    let lines = fx.sink.take("#docs");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("two"));
    assert!(lines[1].ends_with("three"));

    fx.monitor.handle_command(Command::RepoLog {
        name: "docs".to_string(),
        branch: "dev".to_string(),
        count: 1,
        reply_to: "#docs".to_string(),
    });
    assert_eq!(
        fx.sink.take("#docs"),
        vec!["No such branch being watched: dev", "Available branches: main"]
    );
}

#[tokio::test]
async fn test_snarf_shows_mentioned_commit() {
    let mut fx = with_docs().await;
    let mentioned = commit(1, "Ada", "Initial import");

    fx.monitor.handle_command(Command::Snarf {
        text: format!("did {} break the build?", mentioned.short_id()),
        reply_to: "#docs".to_string(),
    });
    assert_eq!(
        fx.sink.take("#docs"),
        vec![
            format!("Talking about {}?", mentioned.short_id()),
            "I. e., [docs|Ada] Initial import".to_string(),
        ]
    );

    fx.monitor.handle_command(Command::Snarf {
        text: format!("did {} break the build?", mentioned.short_id()),
        reply_to: "#other".to_string(),
    });
    assert!(fx.sink.take("#other").is_empty());
}

#[tokio::test]
async fn test_remove_repository() {
    let mut fx = with_docs().await;

    fx.monitor.handle_command(Command::RemoveRepository {
        name: "docs".to_string(),
        reply_to: "#docs".to_string(),
    });
    assert_eq!(fx.sink.take("#docs"), vec!["Repository deleted"]);
    assert!(fx.monitor.registry().names().is_empty());
    assert!(fx.store.load_repository_names().unwrap().is_empty());
    assert!(fx.store.load_options("docs").unwrap().is_none());
}

#[tokio::test]
async fn test_restart_restores_repositories_from_store() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_options("docs", &RepoOptions::new("docs-url", vec!["#docs".to_string()]))
        .unwrap();
    store.save_repository_names(&["docs".to_string()]).unwrap();

    let temp_dir = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::new());
    vcs.add_remote("docs-url", "main", vec![commit(1, "Ada", "Initial import")]);
    let sink = Arc::new(RecordingSink::new());
    let config = MonitorConfig {
        repo_dir: temp_dir.path().to_path_buf(),
        poll_period_secs: 0,
        ..MonitorConfig::default()
    };
    let mut monitor = Monitor::new(config, vcs.clone(), store, sink.clone()).unwrap();
    assert_eq!(monitor.registry().names(), vec!["docs"]);

    // the missing mirror is cloned again and baselined without announcing history
    monitor.handle_command(Command::Poll {
        name: None,
        force: false,
        reply_to: "#docs".to_string(),
    });
    monitor.drain().await;
    assert_eq!(sink.take("#docs"), vec!["The operation succeeded."]);
    assert!(temp_dir.path().join("docs").exists());
    let docs = monitor.registry().get("docs").unwrap();
    assert_eq!(docs.cursor("main"), Some(commit(1, "Ada", "").id));
}

#[tokio::test]
async fn test_run_serves_commands_until_shutdown() {
    let fx = with_docs().await;
    let Fixture {
        _temp_dir, vcs, sink, monitor, ..
    } = fx;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    command_tx
        .send(Command::GitConf {
            reply_to: "#admin".to_string(),
        })
        .unwrap();
    drop(command_tx);

    let calls = vcs.calls();
    monitor
        .run(command_rx, tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    let replies = sink.take("#admin");
    assert!(replies.contains(&"max_commits_at_once: 5".to_string()));
    // polling is disabled in the fixture, so no fetch happened
    assert_eq!(vcs.calls(), calls);
}

#[tokio::test]
async fn test_superseded_poll_still_announces_every_repository() {
    let mut fx = with_docs_and_guide().await;
    fx.vcs.push("docs-url", "main", vec![commit(2, "Grace", "Add chapter")]);
    fx.vcs.push("guide-url", "main", vec![commit(3, "Linus", "Add index")]);
    fx.vcs.set_fetch_delay(Duration::from_millis(100));

    fx.monitor.handle_command(poll(None, false, "#docs"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // restarts the run while the first repository is still being fetched
    fx.monitor.handle_command(poll(None, true, "#admin"));
    fx.monitor.drain().await;

    let docs = fx.sink.take("#docs");
    assert_eq!(pushed_lines(&docs), vec!["Grace pushed 1 commit(s) to main at docs"]);
    assert_eq!(docs.last().map(String::as_str), Some("The operation succeeded."));
    let guide = fx.sink.take("#guide");
    assert_eq!(pushed_lines(&guide), vec!["Linus pushed 1 commit(s) to main at guide"]);
    assert_eq!(fx.sink.take("#admin"), vec!["The operation succeeded."]);
    assert_eq!(fx.vcs.max_active(), 1);
}

#[tokio::test]
async fn test_repository_removed_mid_run_is_not_announced() {
    let mut fx = with_docs().await;
    fx.vcs.push("docs-url", "main", vec![commit(2, "Grace", "Add chapter")]);
    fx.vcs.set_fetch_delay(Duration::from_millis(200));

    fx.monitor.handle_command(poll(None, false, "#admin"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.monitor.handle_command(Command::RemoveRepository {
        name: "docs".to_string(),
        reply_to: "#docs".to_string(),
    });
    fx.monitor.drain().await;

    assert_eq!(fx.sink.take("#docs"), vec!["Repository deleted"]);
    assert_eq!(fx.sink.take("#admin"), vec!["The operation succeeded."]);
    assert!(!fx.monitor.is_busy());
}

#[tokio::test]
async fn test_status_commands_do_not_wait_for_a_fetch() {
    let mut fx = with_docs().await;
    fx.vcs.set_fetch_delay(Duration::from_millis(500));

    fx.monitor.handle_command(poll(None, false, "#admin"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    fx.monitor.handle_command(Command::RepoStat {
        name: "docs".to_string(),
        reply_to: "#docs".to_string(),
    });
    fx.monitor.handle_command(Command::ListRepositories {
        reply_to: "#docs".to_string(),
    });
    fx.monitor.handle_command(Command::RepoLog {
        name: "docs".to_string(),
        branch: "main".to_string(),
        count: 1,
        reply_to: "#docs".to_string(),
    });
    assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());
    assert_eq!(
        fx.sink.take("#docs"),
        vec![
            "Watched branches: main",
            "docs  docs-url  1 branch(es)",
            "Error: Repository docs is busy, try again later",
        ]
    );

    fx.monitor.drain().await;
    fx.monitor.handle_command(Command::RepoLog {
        name: "docs".to_string(),
        branch: "main".to_string(),
        count: 1,
        reply_to: "#docs".to_string(),
    });
    let lines = fx.sink.take("#docs");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("Initial import"), "{}", lines[0]);
}

#[tokio::test]
async fn test_add_after_remove_waits_for_mirror_deletion() {
    let mut fx = with_docs().await;
    let mirror = fx._temp_dir.path().join("docs");

    fx.monitor.handle_command(Command::RemoveRepository {
        name: "docs".to_string(),
        reply_to: "#docs".to_string(),
    });
    fx.monitor.handle_command(add_docs("#docs"));
    assert_eq!(
        fx.sink.take("#docs"),
        vec!["Repository deleted", "Error: Repository docs is busy, try again later"]
    );
    assert!(fx.monitor.is_busy());

    fx.monitor.drain().await;
    assert!(!mirror.exists());

    fx.monitor.handle_command(add_docs("#docs"));
    fx.monitor.drain().await;
    assert_eq!(
        fx.sink.take("#docs"),
        vec!["Cloning of docs started...", "Repository docs created and cloned"]
    );
    assert!(mirror.exists());
    assert_eq!(fx.monitor.registry().names(), vec!["docs"]);
}

#[tokio::test]
async fn test_poll_single_repository() {
    let mut fx = with_docs_and_guide().await;
    fx.vcs.push("docs-url", "main", vec![commit(2, "Grace", "Add chapter")]);
    fx.vcs.push("guide-url", "main", vec![commit(3, "Linus", "Add index")]);

    fx.monitor.handle_command(poll(Some("guide"), false, "#docs"));
    assert_eq!(fx.sink.take("#docs"), vec!["Sorry, not allowed in this channel."]);
    fx.monitor.handle_command(poll(Some("ghost"), false, "#docs"));
    assert_eq!(fx.sink.take("#docs"), vec!["No repository named ghost"]);
    assert!(!fx.monitor.is_busy());

    fx.monitor.handle_command(poll(Some("docs"), false, "#docs"));
    fx.monitor.drain().await;
    let docs = fx.sink.take("#docs");
    assert_eq!(pushed_lines(&docs), vec!["Grace pushed 1 commit(s) to main at docs"]);
    assert_eq!(docs.last().map(String::as_str), Some("The operation succeeded."));
    assert!(fx.sink.take("#guide").is_empty());
    assert_eq!(
        fx.monitor.registry().get("guide").unwrap().cursor("main"),
        Some(commit(1, "Ada", "").id)
    );
}
