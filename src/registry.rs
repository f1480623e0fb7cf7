//! Controller registry and dependency resolution
//!
//! A [`ControllerClass`] declares a controller's actions: for each action a
//! name, ordered parameter [`Descriptor`]s, and a return descriptor. The
//! [`ControllerRegistry`] maps controller ids to classes; the [`Injector`]
//! resolves a class to a live [`Controller`] instance.
//!
//! Invocation is dynamic: a [`Controller`] receives the method name and the
//! decoded positional arguments and returns a boxed future resolving to an
//! [`ActionOutcome`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::frame::ErrorDetail;
use crate::schema::Descriptor;
use crate::source::{LiveCollection, Observable};
use crate::value::Value;

/// A failure raised by (or on behalf of) an action body
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ActionError {
    /// Declared class name of the error, preserved onto the wire
    pub class_type: Option<String>,
    /// Human readable description
    pub message: String,
    /// Captured backtrace, if any
    pub stack: Option<String>,
}

impl ActionError {
    /// An untyped failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            class_type: None,
            message: message.into(),
            stack: None,
        }
    }

    /// A failure carrying its class identity
    pub fn typed(class_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_type: Some(class_type.into()),
            message: message.into(),
            stack: None,
        }
    }
}

impl From<ActionError> for ErrorDetail {
    fn from(e: ActionError) -> Self {
        ErrorDetail {
            class_type: e.class_type,
            message: e.message,
            stack: e.stack,
        }
    }
}

/// What an action produced, after awaiting.
///
/// Variant order is the classification order: an entity handle wins over a
/// collection, a collection over a push source, and a plain value is the
/// fallback.
#[derive(Debug)]
pub enum ActionOutcome {
    /// A single-value live entity handle
    Entity(Value),
    /// A live collection to snapshot and diff-stream
    Collection(LiveCollection),
    /// A push source
    Observable(Observable),
    /// A plain value
    Value(Value),
}

/// Future type returned by dynamic action invocation
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<ActionOutcome, ActionError>> + Send>>;

/// A live controller instance
pub trait Controller: Send + Sync {
    /// Invoke `method` with positional arguments in declaration order
    fn call(&self, method: &str, args: Vec<Value>) -> ActionFuture;
}

#[derive(Debug, Clone)]
struct ActionDecl {
    name: String,
    parameters: Vec<Descriptor>,
    result: Descriptor,
}

/// Declared metadata of one controller
#[derive(Debug, Clone)]
pub struct ControllerClass {
    name: String,
    actions: Vec<ActionDecl>,
}

impl ControllerClass {
    /// A class with no actions yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Declare an action
    pub fn action(
        mut self,
        name: impl Into<String>,
        parameters: Vec<Descriptor>,
        result: Descriptor,
    ) -> Self {
        self.actions.push(ActionDecl {
            name: name.into(),
            parameters,
            result,
        });
        self
    }

    /// The controller id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the declared actions
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    /// Whether an action of this name is declared
    pub fn has_action(&self, method: &str) -> bool {
        self.actions.iter().any(|a| a.name == method)
    }

    /// Parameter declarations of an action, in call order
    pub fn parameters_of(&self, method: &str) -> Option<&[Descriptor]> {
        self.actions
            .iter()
            .find(|a| a.name == method)
            .map(|a| a.parameters.as_slice())
    }

    /// Return declaration of an action
    pub fn result_of(&self, method: &str) -> Option<&Descriptor> {
        self.actions.iter().find(|a| a.name == method).map(|a| &a.result)
    }
}

/// Controller classes, keyed by controller id
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    classes: HashMap<String, Arc<ControllerClass>>,
}

impl ControllerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under its own name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, class: ControllerClass) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    /// Look up a class by controller id
    pub fn get(&self, id: &str) -> Option<Arc<ControllerClass>> {
        self.classes.get(id).cloned()
    }
}

/// Resolves controller classes to live instances
pub trait Injector: Send + Sync {
    /// Produce an instance for the class, or fail with a resolution error
    fn get(&self, class: &ControllerClass) -> Result<Arc<dyn Controller>, ActionError>;
}

/// An injector holding one pre-built instance per controller id
#[derive(Default)]
pub struct SingletonInjector {
    instances: HashMap<String, Arc<dyn Controller>>,
}

impl SingletonInjector {
    /// An empty injector
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an instance to a controller id
    pub fn bind(&mut self, id: impl Into<String>, instance: Arc<dyn Controller>) {
        self.instances.insert(id.into(), instance);
    }
}

impl Injector for SingletonInjector {
    fn get(&self, class: &ControllerClass) -> Result<Arc<dyn Controller>, ActionError> {
        self.instances.get(class.name()).cloned().ok_or_else(|| {
            ActionError::new(format!("no instance bound for controller '{}'", class.name()))
        })
    }
}

/// Pre-invocation authorization hook.
///
/// Checked after the controller is resolved and before the method runs. A
/// denial is reported to the caller like any other invocation failure.
pub trait ActionGuard: Send + Sync {
    /// Allow or deny one action call
    fn allow(&self, controller: &str, method: &str) -> Result<(), ActionError>;
}
