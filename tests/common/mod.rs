#![allow(dead_code)]

use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parcel_rpc::frame::{Frame, FrameKind};
use parcel_rpc::registry::{
    ActionError, ActionFuture, ActionOutcome, Controller, ControllerClass, ControllerRegistry,
    SingletonInjector,
};
use parcel_rpc::schema::{Descriptor, TypeKind};
use parcel_rpc::server::Dispatcher;
use parcel_rpc::source::{LiveCollection, Observable};
use parcel_rpc::value::Value;

pub struct MathController {
    pub calls: Arc<AtomicUsize>,
}

impl Controller for MathController {
    fn call(&self, method: &str, args: Vec<Value>) -> ActionFuture {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "add" => {
                    let a = args[0].as_int().unwrap_or(0);
                    let b = args[1].as_int().unwrap_or(0);
                    Ok(ActionOutcome::Value(Value::Int(a + b)))
                }
                "boom" => Err(ActionError::typed("RangeError", "out of range")),
                "whoami" => Ok(ActionOutcome::Entity(Value::object([
                    ("id", Value::Int(1)),
                    ("name", Value::from("someone")),
                ]))),
                other => Err(ActionError::new(format!("unhandled method '{other}'"))),
            }
        })
    }
}

pub struct FeedController {
    pub calls: Arc<AtomicUsize>,
    pub stream: Observable,
    pub subject: Observable,
    pub latched: Observable,
}

impl Controller for FeedController {
    fn call(&self, method: &str, _args: Vec<Value>) -> ActionFuture {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let outcome = match method {
            "ticks" => Ok(ActionOutcome::Observable(self.stream.clone())),
            "pulse" => Ok(ActionOutcome::Observable(self.subject.clone())),
            "greeting" => Ok(ActionOutcome::Observable(self.latched.clone())),
            other => Err(ActionError::new(format!("unhandled method '{other}'"))),
        };
        Box::pin(async move { outcome })
    }
}

pub struct BoardController {
    pub board: LiveCollection,
}

impl Controller for BoardController {
    fn call(&self, method: &str, _args: Vec<Value>) -> ActionFuture {
        let outcome = match method {
            "watch" => Ok(ActionOutcome::Collection(self.board.clone())),
            other => Err(ActionError::new(format!("unhandled method '{other}'"))),
        };
        Box::pin(async move { outcome })
    }
}

pub struct Fixture {
    pub dispatcher: Dispatcher,
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub calls: Arc<AtomicUsize>,
    pub stream: Observable,
    pub subject: Observable,
    pub latched: Observable,
    pub board: LiveCollection,
}

pub fn item(id: i64, label: &str) -> Value {
    Value::object([("id", Value::Int(id)), ("label", Value::from(label))])
}

pub fn registry() -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    registry.register(
        ControllerClass::new("c1")
            .action(
                "add",
                vec![
                    Descriptor::new("a", TypeKind::Int),
                    Descriptor::new("b", TypeKind::Int),
                ],
                Descriptor::new("return", TypeKind::Int),
            )
            .action("boom", vec![], Descriptor::new("return", TypeKind::Int))
            .action("whoami", vec![], Descriptor::new("return", TypeKind::Object)),
    );
    registry.register(
        ControllerClass::new("feed")
            .action(
                "ticks",
                vec![],
                Descriptor::new("return", TypeKind::Stream(Some(Box::new(TypeKind::Int)))),
            )
            .action(
                "pulse",
                vec![],
                Descriptor::new("return", TypeKind::Stream(Some(Box::new(TypeKind::Int)))),
            )
            .action(
                "greeting",
                vec![],
                Descriptor::new("return", TypeKind::Stream(Some(Box::new(TypeKind::Str)))),
            )
            .action("broken", vec![], Descriptor::new("return", TypeKind::Stream(None))),
    );
    registry.register(ControllerClass::new("board").action(
        "watch",
        vec![],
        Descriptor::new("return", TypeKind::Collection(Some(Box::new(TypeKind::Object)))),
    ));
    registry
}

pub fn fixture() -> Fixture {
    let calls = Arc::new(AtomicUsize::new(0));
    let stream = Observable::stream();
    let subject = Observable::subject();
    let latched = Observable::latched_subject(Value::from("hi"));
    let board = LiveCollection::new(
        Value::object([("query", Value::from("all"))]),
        Value::from("ready"),
        vec![item(1, "x"), item(2, "y")],
    );

    let mut injector = SingletonInjector::new();
    injector.bind(
        "c1",
        Arc::new(MathController {
            calls: calls.clone(),
        }),
    );
    injector.bind(
        "feed",
        Arc::new(FeedController {
            calls: calls.clone(),
            stream: stream.clone(),
            subject: subject.clone(),
            latched: latched.clone(),
        }),
    );
    injector.bind(
        "board",
        Arc::new(BoardController {
            board: board.clone(),
        }),
    );

    let (dispatcher, frames) = Dispatcher::new(registry(), Arc::new(injector));
    Fixture {
        dispatcher,
        frames,
        calls,
        stream,
        subject,
        latched,
        board,
    }
}

pub fn action_frame(id: u32, controller: &str, method: &str, args: Value) -> Frame {
    let body = Value::object([
        ("controller", Value::from(controller)),
        ("method", Value::from(method)),
        ("args", args),
    ]);
    Frame::new(id, FrameKind::Action, &body).unwrap()
}

pub fn no_args() -> Value {
    Value::Object(Vec::new())
}

pub async fn recv_frame(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("frame channel closed")
}

pub async fn assert_silent(frames: &mut mpsc::UnboundedReceiver<Frame>) {
    let extra = timeout(Duration::from_millis(50), frames.recv()).await;
    assert!(extra.is_err(), "unexpected frame: {:?}", extra.unwrap());
}
