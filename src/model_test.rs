use super::*;

fn note(id: &str) -> Node {
    Node::new(id, NodeKind::Note, Position { x: 1.0, y: 2.0 }, Size { width: 100.0, height: 50.0 })
}

#[test]
fn widget_projection_reads_label_and_data() {
    let node = note("n1").with_payload(serde_json::json!({ "label": "Revenue", "data": [{ "label": "q1", "value": 4 }] }));
    let widget = Widget::from(&node);
    assert_eq!(widget.props.label, "Revenue");
    assert_eq!(widget.props.data, serde_json::json!([{ "label": "q1", "value": 4 }]));
    assert_eq!((widget.props.width, widget.props.height), (100.0, 50.0));
}

#[test]
fn widget_projection_falls_back_to_kind_and_empty_data() {
    let widget = Widget::from(&note("n1").with_payload(serde_json::json!({ "data": "not-an-array" })));
    assert_eq!(widget.props.label, "note");
    assert_eq!(widget.props.data, serde_json::json!([]));
}

#[test]
fn patch_reports_change_only_when_values_differ() {
    let mut node = note("n1");
    assert!(!node.apply_patch(&NodePatch::position(1.0, 2.0)));
    assert!(node.apply_patch(&NodePatch::size(10.0, 10.0)));
    assert_eq!(node.id, "n1");
}

#[test]
fn node_change_uses_tagged_wire_shape() {
    let change: NodeChange =
        serde_json::from_value(serde_json::json!({ "type": "position", "id": "a", "position": { "x": 3.0, "y": 4.0 } }))
            .unwrap();
    assert_eq!(change, NodeChange::Position { id: "a".into(), position: Position { x: 3.0, y: 4.0 } });
}

#[test]
fn event_type_parses_full_vocabulary() {
    for name in [
        "node_add",
        "node_update",
        "node_delete",
        "share_invite",
        "share_accept",
        "share_revoke",
        "comment_add",
        "comment_resolve",
        "restore_version",
    ] {
        let parsed: BoardEventType = name.parse().unwrap();
        assert_eq!(parsed.as_str(), name);
    }
    assert_eq!("node_move".parse::<BoardEventType>(), Err(UnknownEventType("node_move".into())));
}

#[test]
fn stored_event_types_parse_leniently() {
    assert_eq!(BoardEventType::parse_lenient("restore_version"), BoardEventType::RestoreVersion);
    assert_eq!(BoardEventType::parse_lenient("board_archived"), BoardEventType::Unknown);
    let parsed: BoardEventType = serde_json::from_value(serde_json::json!("board_archived")).unwrap();
    assert_eq!(parsed, BoardEventType::Unknown);
}

fn event(event_type: BoardEventType, payload: serde_json::Value) -> BoardEvent {
    BoardEvent { id: 1, board_id: Uuid::nil(), actor_id: Uuid::nil(), event_type, payload, created_at: 0 }
}

#[test]
fn event_payload_accessors_check_type() {
    let update = event(BoardEventType::NodeUpdate, node_update_payload(&[note("n1")]));
    assert_eq!(update.nodes(), Some(vec![note("n1")]));
    assert_eq!(update.restored_version(), None);

    let restore = event(BoardEventType::RestoreVersion, restore_version_payload(200));
    assert_eq!(restore.restored_version(), Some(200));
    assert_eq!(restore.nodes(), None);

    let malformed = event(BoardEventType::NodeUpdate, serde_json::json!({ "nodes": 5 }));
    assert_eq!(malformed.nodes(), None);
}

#[test]
fn roles_and_statuses_parse_leniently() {
    assert_eq!(BoardRole::parse_lenient("editor"), BoardRole::Editor);
    assert_eq!(BoardRole::parse_lenient("admin"), BoardRole::Viewer);
    assert!(!BoardRole::Viewer.can_mutate());
    assert_eq!(MemberStatus::parse_lenient(""), MemberStatus::Active);
    assert_eq!(MemberStatus::parse_lenient("revoked"), MemberStatus::Revoked);
}
