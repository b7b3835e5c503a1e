use std::sync::Arc;
use std::time::Duration;

use workbench::{
    ArtifactCallbackData, ArtifactUpdate, RegistryOutcome, Workbench, WorkbenchView,
};
use workbench_core::{EntryState, ModificationKind, ScrollPosition};
use workbench_runexec::{ActionCallbackData, ActionPayload, ActionStatus};
use workbench_sandbox::{LocalSandbox, MemorySandbox};
use workbench_settings::WorkbenchConfig;

const WORK_DIR: &str = "/home/workspace";

fn config() -> WorkbenchConfig {
    let mut config = WorkbenchConfig::default();
    config.watch.coalesce_window_ms = 10;
    config
}

async fn started(files: &[(&str, &str)]) -> (Arc<MemorySandbox>, Workbench) {
    let sandbox = Arc::new(MemorySandbox::new(WORK_DIR));
    for (path, content) in files {
        sandbox.put_file(path, *content).expect("seed file");
    }
    let workbench = Workbench::new(Arc::<MemorySandbox>::clone(&sandbox), config());
    workbench.start().await.expect("start watching");
    let expected = files.len();
    eventually("initial files mirrored", || {
        workbench.documents().get().len() == expected
            && (expected == 0 || workbench.selected_file().is_some())
    })
    .await;
    (sandbox, workbench)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn content_of(workbench: &Workbench, path: &str) -> Option<String> {
    workbench
        .files()
        .get()
        .file(path)
        .map(|file| file.content().to_string())
}

fn assert_unsaved_consistent(workbench: &Workbench) {
    let files = workbench.files().get();
    let unsaved = workbench.unsaved().get();
    for (path, document) in workbench.documents().get().iter() {
        let differs = files
            .file(path)
            .is_some_and(|file| file.content() != document.value);
        assert_eq!(unsaved.contains(path), differs, "unsaved flag for {path}");
    }
    for path in unsaved.iter() {
        assert!(workbench.documents().get().contains_key(path), "{path} has no buffer");
    }
}

#[tokio::test]
async fn external_files_are_mirrored_and_first_file_selected() {
    let (_sandbox, workbench) = started(&[("src/main.ts", "main"), ("README.md", "readme")]).await;

    assert_eq!(content_of(&workbench, "/home/workspace/src/main.ts").as_deref(), Some("main"));
    assert!(matches!(
        workbench.files().get().state("/home/workspace/src"),
        EntryState::Present(_)
    ));
    assert_eq!(workbench.selected_file().as_deref(), Some("/home/workspace/README.md"));
    assert_eq!(workbench.current_document().unwrap().value, "readme");
    assert_eq!(workbench.documents().get().len(), 2);
}

#[tokio::test]
async fn save_then_modifications_then_prepare_message() {
    let (sandbox, workbench) = started(&[("a.txt", "hi")]).await;

    workbench.set_current_document_content("bye");
    assert!(workbench.unsaved().get().contains("/home/workspace/a.txt"));
    workbench.save_current_document().await.unwrap();

    assert_eq!(sandbox.file("a.txt").unwrap(), b"bye");
    assert!(workbench.unsaved().get().is_empty());
    let mods = workbench.get_file_modifications();
    let entry = &mods["/home/workspace/a.txt"];
    assert!(matches!(entry.kind, ModificationKind::Diff | ModificationKind::File));

    let message = workbench.prepare_message("make it shout").await.unwrap();
    assert!(message.starts_with("<file_modifications>"));
    assert!(message.contains("path=\"/home/workspace/a.txt\""));
    assert!(message.ends_with("</file_modifications>\n\nmake it shout"));
    assert!(workbench.get_file_modifications().is_empty());

    let untouched = workbench.prepare_message("again").await.unwrap();
    assert_eq!(untouched, "again");
}

#[tokio::test]
async fn prepare_message_saves_pending_edits_first() {
    let (sandbox, workbench) = started(&[("a.txt", "one\n")]).await;
    workbench.set_current_document_content("two\n");

    let message = workbench.prepare_message("continue").await.unwrap();

    assert_eq!(sandbox.file("a.txt").unwrap(), b"two\n");
    assert!(message.contains("two"));
    assert!(workbench.unsaved().get().is_empty());
}

#[tokio::test]
async fn save_then_reset_keeps_saved_content() {
    let (_sandbox, workbench) = started(&[("p.txt", "orig")]).await;
    workbench.set_current_document_content("X");
    workbench.save_current_document().await.unwrap();
    workbench.reset_current_document();
    assert_eq!(workbench.current_document().unwrap().value, "X");
    assert_unsaved_consistent(&workbench);
}

#[tokio::test]
async fn unsaved_set_stays_consistent_through_edits_and_external_changes() {
    let (sandbox, workbench) = started(&[("a.txt", "a"), ("b.txt", "b")]).await;

    workbench.set_current_document_content("a1");
    assert_unsaved_consistent(&workbench);
    workbench.set_selected_file(Some("/home/workspace/b.txt"));
    workbench.set_current_document_content("b");
    assert_unsaved_consistent(&workbench);
    workbench.set_current_document_content("b2");
    assert_unsaved_consistent(&workbench);

    sandbox.put_file("a.txt", "a1").unwrap();
    eventually("external change applied", || {
        !workbench.unsaved().get().contains("/home/workspace/a.txt")
    })
    .await;
    assert_unsaved_consistent(&workbench);
    assert!(!workbench.unsaved().get().contains("/home/workspace/a.txt"));
    assert!(workbench.unsaved().get().contains("/home/workspace/b.txt"));
}

#[tokio::test]
async fn external_edits_refresh_clean_buffers_but_not_dirty_ones() {
    let (sandbox, workbench) = started(&[("a.txt", "a"), ("b.txt", "b")]).await;
    workbench.set_current_document_content("draft");
    workbench.set_current_document_scroll_position(ScrollPosition::new(40.0, 0.0));

    sandbox.put_file("a.txt", "theirs").unwrap();
    sandbox.put_file("b.txt", "b-new").unwrap();
    eventually("external edits applied", || {
        workbench.documents().get()["/home/workspace/b.txt"].value == "b-new"
    })
    .await;

    let documents = workbench.documents().get();
    assert_eq!(documents["/home/workspace/a.txt"].value, "draft");
    assert_eq!(documents["/home/workspace/a.txt"].scroll, ScrollPosition::new(40.0, 0.0));
    assert_eq!(documents["/home/workspace/b.txt"].value, "b-new");
}

#[tokio::test]
async fn removing_a_folder_tombstones_everything_below_it() {
    let (sandbox, workbench) =
        started(&[("src/index.ts", "export {}"), ("src/lib/util.ts", "x"), ("srcx.ts", "y")]).await;

    sandbox.remove("src").unwrap();
    eventually("folder removal applied", || {
        !workbench.documents().get().contains_key("/home/workspace/src/index.ts")
    })
    .await;

    let files = workbench.files().get();
    assert_eq!(files.state("/home/workspace/src/index.ts"), EntryState::Removed);
    assert_eq!(files.state("/home/workspace/src/lib/util.ts"), EntryState::Removed);
    assert!(files.file("/home/workspace/srcx.ts").is_some());
    assert_eq!(workbench.files_count(), 1);
    assert!(workbench.documents().get().get("/home/workspace/src/index.ts").is_none());
}

#[tokio::test]
async fn failed_saves_keep_the_buffer_unsaved() {
    let (sandbox, workbench) = started(&[("a.txt", "a")]).await;
    workbench.set_current_document_content("edited");
    sandbox.fail_writes_to("a.txt");

    let err = workbench.save_current_document().await.unwrap_err();

    assert!(!err.is_invariant());
    assert_eq!(content_of(&workbench, "/home/workspace/a.txt").as_deref(), Some("a"));
    assert!(workbench.unsaved().get().contains("/home/workspace/a.txt"));
    assert!(workbench.get_file_modifications().is_empty());
}

#[tokio::test]
async fn artifact_actions_flow_back_through_the_watcher() {
    let (sandbox, workbench) = started(&[]).await;
    let artifact = ArtifactCallbackData {
        message_id: "msg-1".into(),
        id: "todo-app".into(),
        title: "Todo app".into(),
    };
    assert_eq!(workbench.add_artifact(artifact.clone()), RegistryOutcome::Applied);
    assert_eq!(workbench.add_artifact(artifact), RegistryOutcome::Ignored);
    assert_eq!(workbench.artifacts().get().len(), 1);

    let write = ActionCallbackData {
        message_id: "msg-1".into(),
        artifact_id: "todo-app".into(),
        action_id: "0".into(),
        action: ActionPayload::File {
            file_path: "src/App.tsx".into(),
            content: "export default function App() {}".into(),
        },
    };
    assert_eq!(workbench.add_action(write.clone()), RegistryOutcome::Applied);
    workbench.run_action(write).await.unwrap();

    assert!(sandbox.file("src/App.tsx").is_some());
    eventually("artifact file mirrored and selected", || {
        workbench.selected_file().as_deref() == Some("/home/workspace/src/App.tsx")
    })
    .await;
    assert!(content_of(&workbench, "/home/workspace/src/App.tsx").is_some());

    let runner = workbench.first_artifact().unwrap().runner;
    assert_eq!(runner.actions().get()["0"].status, ActionStatus::Complete);

    workbench.update_artifact(
        "msg-1",
        ArtifactUpdate {
            closed: Some(true),
            ..ArtifactUpdate::default()
        },
    );
    assert!(workbench.first_artifact().unwrap().closed);
}

#[tokio::test]
async fn running_an_action_without_an_artifact_is_an_invariant_violation() {
    let (_sandbox, workbench) = started(&[]).await;
    let err = workbench
        .run_action(ActionCallbackData {
            message_id: "ghost".into(),
            artifact_id: "none".into(),
            action_id: "0".into(),
            action: ActionPayload::Shell {
                content: "ls".into(),
            },
        })
        .await
        .unwrap_err();
    assert!(err.is_invariant());
}

#[tokio::test]
async fn sandbox_work_dir_wins_over_the_configured_one() {
    let sandbox = Arc::new(MemorySandbox::new("/w"));
    sandbox.put_file("a.txt", "from /w").expect("seed file");
    let workbench = Workbench::new(Arc::<MemorySandbox>::clone(&sandbox), config());
    workbench.start().await.expect("start watching");

    eventually("file under the sandbox work dir mirrored", || {
        workbench.selected_file().as_deref() == Some("/w/a.txt")
    })
    .await;
    assert_eq!(workbench.config().work_dir, "/w");
    assert_eq!(workbench.config().watch.include, vec!["/w/**".to_string()]);
    assert_eq!(content_of(&workbench, "/w/a.txt").as_deref(), Some("from /w"));

    workbench.set_current_document_content("edited");
    workbench.save_current_document().await.unwrap();
    assert_eq!(sandbox.file("a.txt").unwrap(), b"edited");
}

#[tokio::test]
async fn ui_flags_are_observable() {
    let (_sandbox, workbench) = started(&[]).await;
    assert!(!*workbench.show_workbench().get());
    workbench.set_show_workbench(true);
    workbench.set_current_view(WorkbenchView::Preview);
    assert!(*workbench.show_workbench().get());
    assert_eq!(*workbench.current_view().get(), WorkbenchView::Preview);
}

#[tokio::test]
async fn start_is_idempotent() {
    let (sandbox, workbench) = started(&[("a.txt", "a")]).await;
    workbench.start().await.unwrap();
    assert_eq!(sandbox.subscriber_count(), 1);
}

#[tokio::test]
async fn local_sandbox_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "draft\n").expect("seed");
    let sandbox = Arc::new(LocalSandbox::new(dir.path(), WORK_DIR).expect("sandbox"));
    let workbench = Workbench::new(sandbox, config());
    workbench.start().await.unwrap();
    eventually("initial scan mirrored", || workbench.current_document().is_some()).await;

    workbench.set_current_document_content("final\n");
    workbench.save_current_document().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "final\n"
    );
    let mods = workbench.get_file_modifications();
    assert!(mods.contains_key("/home/workspace/notes.txt"));
}
