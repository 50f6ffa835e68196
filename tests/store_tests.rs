//! Integration tests for the task store layer, against an in-memory
//! SQLite database.

use task_warden::db::Database;
use task_warden::types::{NewTask, TaskStatus};

fn setup_db() -> Database {
    Database::open_in_memory().expect("failed to create in-memory database")
}

fn new_task(subject: &str) -> NewTask {
    NewTask {
        creator: "coordinator".to_string(),
        subject: subject.to_string(),
        prompt: format!("instructions for {}", subject),
        ..Default::default()
    }
}

mod task_crud {
    use super::*;

    #[test]
    fn insert_assigns_monotonic_ids_and_root() {
        let db = setup_db();

        let a = db.insert_task(&new_task("first")).unwrap();
        let b = db.insert_task(&new_task("second")).unwrap();

        assert!(b.id > a.id);
        assert_eq!(a.root_task_id, a.id);
        assert_eq!(b.root_task_id, b.id);
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.retry_count, 0);
        assert!(a.started_at.is_none());
        assert!(a.completed_at.is_none());
    }

    #[test]
    fn children_inherit_the_root() {
        let db = setup_db();

        let root = db.insert_task(&new_task("root")).unwrap();
        let child = db
            .insert_task(&NewTask {
                parent_task_id: Some(root.id),
                ..new_task("child")
            })
            .unwrap();
        let grandchild = db
            .insert_task(&NewTask {
                parent_task_id: Some(child.id),
                ..new_task("grandchild")
            })
            .unwrap();

        assert_eq!(child.root_task_id, root.id);
        assert_eq!(grandchild.root_task_id, root.id);
        assert_eq!(db.task_depth(root.id).unwrap(), 0);
        assert_eq!(db.task_depth(child.id).unwrap(), 1);
        assert_eq!(db.task_depth(grandchild.id).unwrap(), 2);
    }

    #[test]
    fn get_task_returns_none_for_unknown_id() {
        let db = setup_db();
        assert!(db.get_task(404).unwrap().is_none());
    }

    #[test]
    fn list_tasks_filters_by_status() {
        let db = setup_db();
        let a = db.insert_task(&new_task("a")).unwrap();
        let b = db.insert_task(&new_task("b")).unwrap();

        db.update_task_status(a.id, a.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap()
            .unwrap();

        let pending = db.list_tasks(Some(TaskStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let all = db.list_tasks(None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn tree_view_nests_descendants() {
        let db = setup_db();
        let root = db.insert_task(&new_task("root")).unwrap();
        let left = db
            .insert_task(&NewTask {
                parent_task_id: Some(root.id),
                ..new_task("left")
            })
            .unwrap();
        let _right = db
            .insert_task(&NewTask {
                parent_task_id: Some(root.id),
                ..new_task("right")
            })
            .unwrap();
        let _leaf = db
            .insert_task(&NewTask {
                parent_task_id: Some(left.id),
                ..new_task("leaf")
            })
            .unwrap();

        let tree = db.get_task_tree(root.id).unwrap().unwrap();
        assert_eq!(tree.children.len(), 2);
        let left_node = tree
            .children
            .iter()
            .find(|c| c.task.id == left.id)
            .expect("left child present");
        assert_eq!(left_node.children.len(), 1);

        // Subtree view from a non-root member
        let subtree = db.get_task_tree(left.id).unwrap().unwrap();
        assert_eq!(subtree.task.id, left.id);
        assert_eq!(subtree.children.len(), 1);
    }
}

mod versioned_updates {
    use super::*;

    #[test]
    fn stale_version_loses_the_update() {
        let db = setup_db();
        let task = db.insert_task(&new_task("contested")).unwrap();

        let won = db
            .update_task_status(task.id, task.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap();
        assert!(won.is_some());

        // Same version again: the row moved on, the write must not apply.
        let lost = db
            .update_task_status(task.id, task.version, TaskStatus::Killed, None, None, None)
            .unwrap();
        assert!(lost.is_none());

        let current = db.require_task(task.id).unwrap();
        assert_eq!(current.status, TaskStatus::Launched);
        assert_eq!(current.assignee.as_deref(), Some("alpha"));
    }

    #[test]
    fn updates_bump_version_and_stamp_timestamps() {
        let db = setup_db();
        let task = db.insert_task(&new_task("stamped")).unwrap();

        let launched = db
            .update_task_status(task.id, task.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(launched.version, task.version + 1);
        assert!(launched.started_at.is_some());
        assert!(launched.completed_at.is_none());

        let started = db
            .update_task_status(launched.id, launched.version, TaskStatus::InProgress, None, None, None)
            .unwrap()
            .unwrap();
        let done = db
            .update_task_status(
                started.id,
                started.version,
                TaskStatus::Completed,
                None,
                None,
                Some("all green"),
            )
            .unwrap()
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.output.as_deref(), Some("all green"));
    }

    #[test]
    fn history_records_every_transition() {
        let db = setup_db();
        let task = db.insert_task(&new_task("tracked")).unwrap();

        let t1 = db
            .update_task_status(task.id, task.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap()
            .unwrap();
        let t2 = db
            .update_task_status(t1.id, t1.version, TaskStatus::InProgress, None, None, None)
            .unwrap()
            .unwrap();
        db.update_task_status(t2.id, t2.version, TaskStatus::Completed, None, None, None)
            .unwrap()
            .unwrap();

        let history = db.get_task_history(task.id).unwrap();
        let statuses: Vec<TaskStatus> = history.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Pending,
                TaskStatus::Launched,
                TaskStatus::InProgress,
                TaskStatus::Completed,
            ]
        );
    }
}

mod gates {
    use super::*;

    #[test]
    fn placeable_excludes_gated_tasks_until_terminal() {
        let db = setup_db();
        let gate = db.insert_task(&new_task("gate")).unwrap();
        let dependent = db
            .insert_task(&NewTask {
                blocked_by_task_id: Some(gate.id),
                ..new_task("dependent")
            })
            .unwrap();

        let ids: Vec<i64> = db.list_placeable().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![gate.id]);

        // Gate fails: the dependent must still become placeable.
        let launched = db
            .update_task_status(gate.id, gate.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap()
            .unwrap();
        let started = db
            .update_task_status(launched.id, launched.version, TaskStatus::InProgress, None, None, None)
            .unwrap()
            .unwrap();
        db.update_task_status(started.id, started.version, TaskStatus::Failed, None, None, None)
            .unwrap()
            .unwrap();

        let ids: Vec<i64> = db.list_placeable().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![dependent.id]);
    }

    #[test]
    fn killed_gate_never_releases() {
        let db = setup_db();
        let gate = db.insert_task(&new_task("gate")).unwrap();
        let _dependent = db
            .insert_task(&NewTask {
                blocked_by_task_id: Some(gate.id),
                ..new_task("dependent")
            })
            .unwrap();

        db.update_task_status(gate.id, gate.version, TaskStatus::Killed, None, None, None)
            .unwrap()
            .unwrap();

        assert!(db.list_placeable().unwrap().is_empty());
    }

    #[test]
    fn propagate_kill_is_transitive_over_gates() {
        let db = setup_db();
        let gate = db.insert_task(&new_task("gate")).unwrap();
        let mid = db
            .insert_task(&NewTask {
                blocked_by_task_id: Some(gate.id),
                ..new_task("mid")
            })
            .unwrap();
        let leaf = db
            .insert_task(&NewTask {
                blocked_by_task_id: Some(mid.id),
                ..new_task("leaf")
            })
            .unwrap();

        db.update_task_status(gate.id, gate.version, TaskStatus::Killed, None, None, None)
            .unwrap()
            .unwrap();
        let killed = db.propagate_kill(gate.id).unwrap();

        assert_eq!(killed, vec![mid.id, leaf.id]);
        assert_eq!(db.require_task(mid.id).unwrap().status, TaskStatus::Killed);
        assert_eq!(db.require_task(leaf.id).unwrap().status, TaskStatus::Killed);
    }

    #[test]
    fn propagate_kill_spares_terminal_dependents() {
        let db = setup_db();
        let gate = db.insert_task(&new_task("gate")).unwrap();
        let done = db
            .insert_task(&NewTask {
                blocked_by_task_id: Some(gate.id),
                ..new_task("already-done")
            })
            .unwrap();

        // Walk the dependent to completed before the gate is killed.
        let l = db
            .update_task_status(done.id, done.version, TaskStatus::Launched, Some("alpha"), None, None)
            .unwrap()
            .unwrap();
        let s = db
            .update_task_status(l.id, l.version, TaskStatus::InProgress, None, None, None)
            .unwrap()
            .unwrap();
        db.update_task_status(s.id, s.version, TaskStatus::Completed, None, None, None)
            .unwrap()
            .unwrap();

        db.update_task_status(gate.id, gate.version, TaskStatus::Killed, None, None, None)
            .unwrap()
            .unwrap();
        let killed = db.propagate_kill(gate.id).unwrap();

        assert!(killed.is_empty());
        assert_eq!(db.require_task(done.id).unwrap().status, TaskStatus::Completed);
    }
}

mod collaborators {
    use super::*;

    #[test]
    fn mailbox_roundtrip_and_unread() {
        let db = setup_db();
        let id = db
            .insert_message("overseer", &["alpha".to_string(), "beta".to_string()], "stand up")
            .unwrap();

        let msg = db.get_message(id).unwrap().unwrap();
        assert_eq!(msg.sender, "overseer");
        assert_eq!(msg.recipients, vec!["alpha", "beta"]);
        assert!(msg.read_at.is_none());

        assert_eq!(db.list_unread_messages().unwrap().len(), 1);
        assert!(db.mark_message_read(id).unwrap());
        assert!(db.list_unread_messages().unwrap().is_empty());
        // Second mark is a no-op.
        assert!(!db.mark_message_read(id).unwrap());
    }

    #[test]
    fn board_links_and_moves_cards() {
        let db = setup_db();
        let task = db.insert_task(&new_task("carded")).unwrap();

        db.link_task_to_card(task.id, "CARD-7").unwrap();
        let card = db.get_card("CARD-7").unwrap().unwrap();
        assert_eq!(card.lane, "backlog");
        assert_eq!(db.card_tasks("CARD-7").unwrap(), vec![task.id]);

        let moved = db.move_card("CARD-7", "doing").unwrap();
        assert_eq!(moved.lane, "doing");

        assert!(db.move_card("CARD-404", "done").is_err());
    }

    #[test]
    fn morsels_append_and_filter_by_tag() {
        let db = setup_db();
        db.append_morsel("tick", "{}", &[]).unwrap();
        db.append_morsel("task-terminal", "{}", &[1, 2]).unwrap();
        db.append_morsel("tick", "{}", &[]).unwrap();

        assert_eq!(db.list_morsels(Some("tick"), 10).unwrap().len(), 2);
        assert_eq!(db.list_morsels(None, 10).unwrap().len(), 3);
        let terminal = &db.list_morsels(Some("task-terminal"), 10).unwrap()[0];
        assert_eq!(terminal.links, vec![1, 2]);
    }
}
