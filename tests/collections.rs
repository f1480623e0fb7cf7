mod common;

use parcel_rpc::frame::{CollectionRemove, Frame, FrameKind, ItemsBody, WireError};
use parcel_rpc::value::Value;

use common::{action_frame, assert_silent, fixture, item, no_args, recv_frame};

fn collection_unsubscribe(call_id: u32) -> Frame {
    Frame::new(call_id, FrameKind::ResponseActionCollectionUnsubscribe, &()).unwrap()
}

#[tokio::test]
async fn opening_composite_holds_model_state_snapshot() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;

    let frame = recv_frame(&mut fx.frames).await;
    assert_eq!(frame.id, 9);
    assert_eq!(frame.kind, FrameKind::ResponseActionCollection);
    let parts = frame.decode_composite().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].kind, FrameKind::ResponseActionCollectionModel);
    assert_eq!(
        parts[0].decode_body::<Value>().unwrap().get("query"),
        Some(&Value::from("all"))
    );
    assert_eq!(parts[1].kind, FrameKind::ResponseActionCollectionState);
    assert_eq!(parts[1].decode_body::<Value>().unwrap(), Value::from("ready"));
    assert_eq!(parts[2].kind, FrameKind::ResponseActionCollectionSet);
    assert_eq!(
        parts[2].decode_body::<ItemsBody>().unwrap().v,
        vec![item(1, "x"), item(2, "y")]
    );
    assert_silent(&mut fx.frames).await;
}

#[tokio::test]
async fn same_tick_changes_coalesce_into_one_frame() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;
    let _ = recv_frame(&mut fx.frames).await;

    fx.board.add(vec![item(3, "z")]);
    fx.board.remove(vec![Value::Int(1)]);

    let frame = recv_frame(&mut fx.frames).await;
    assert_eq!(frame.kind, FrameKind::ResponseActionCollectionChange);
    let parts = frame.decode_composite().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].kind, FrameKind::ResponseActionCollectionAdd);
    assert_eq!(parts[0].decode_body::<ItemsBody>().unwrap().v, vec![item(3, "z")]);
    assert_eq!(parts[1].kind, FrameKind::ResponseActionCollectionRemove);
    assert_eq!(
        parts[1].decode_body::<CollectionRemove>().unwrap().ids,
        vec![Value::Int(1)]
    );
    assert_silent(&mut fx.frames).await;
}

#[tokio::test]
async fn set_event_resnapshots_when_the_frame_is_built() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;
    let _ = recv_frame(&mut fx.frames).await;

    // both land in one batch; the snapshot is taken at flush time and so
    // already contains the item added after the set event
    fx.board.replace(vec![item(10, "a")]);
    fx.board.add(vec![item(11, "b")]);

    let frame = recv_frame(&mut fx.frames).await;
    let parts = frame.decode_composite().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].kind, FrameKind::ResponseActionCollectionSet);
    assert_eq!(
        parts[0].decode_body::<ItemsBody>().unwrap().v,
        vec![item(10, "a"), item(11, "b")]
    );
    assert_eq!(parts[1].kind, FrameKind::ResponseActionCollectionAdd);
}

#[tokio::test]
async fn state_changes_are_forwarded() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;
    let _ = recv_frame(&mut fx.frames).await;

    fx.board.set_state(Value::from("loading"));
    let frame = recv_frame(&mut fx.frames).await;
    let parts = frame.decode_composite().unwrap();
    assert_eq!(parts[0].kind, FrameKind::ResponseActionCollectionState);
    assert_eq!(parts[0].decode_body::<Value>().unwrap(), Value::from("loading"));
}

#[tokio::test]
async fn unsubscribe_silences_the_feed() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;
    let _ = recv_frame(&mut fx.frames).await;

    fx.dispatcher.handle(collection_unsubscribe(9)).await;
    fx.board.replace(vec![item(5, "q")]);
    assert_silent(&mut fx.frames).await;

    // the entry is gone; a second unsubscribe reports that
    fx.dispatcher.handle(collection_unsubscribe(9)).await;
    let err = recv_frame(&mut fx.frames).await;
    assert_eq!(err.kind, FrameKind::Error);
    match err.decode_body::<WireError>().unwrap() {
        WireError::General(detail) => assert_eq!(detail.message, "No collection found"),
        other => panic!("unexpected error body: {other:?}"),
    }
}

#[tokio::test]
async fn close_releases_the_collection() {
    let mut fx = fixture();
    fx.dispatcher
        .handle(action_frame(9, "board", "watch", no_args()))
        .await;
    let _ = recv_frame(&mut fx.frames).await;

    fx.dispatcher.close();
    fx.board.add(vec![item(6, "late")]);
    assert_silent(&mut fx.frames).await;
}
