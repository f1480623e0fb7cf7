//! Action invocation
//!
//! The pipeline for one `Action` frame: parse the call envelope, derive or
//! fetch the action's types, decode and validate the arguments, resolve the
//! controller instance, invoke, then branch on the shape of the awaited
//! result. Validation rejects before the controller method ever runs.

use tracing::{debug, trace};

use crate::frame::{Frame, FrameKind, ResultBody, TypeDescription};
use crate::registry::ActionOutcome;
use crate::server::{DispatchError, Dispatcher};
use crate::value::Value;

fn parse_call(body: &Value) -> Result<(String, String), DispatchError> {
    let controller = body.get("controller").and_then(Value::as_str);
    let method = body.get("method").and_then(Value::as_str);
    match (controller, method) {
        (Some(controller), Some(method)) => Ok((controller.to_string(), method.to_string())),
        _ => Err(DispatchError::Control("malformed action call".to_string())),
    }
}

impl Dispatcher {
    pub(crate) async fn handle_action(&self, frame: &Frame) -> Result<(), DispatchError> {
        let body: Value = frame.decode_body()?;
        let (controller, method) = parse_call(&body)?;
        let class = self
            .shared
            .registry
            .get(&controller)
            .ok_or_else(|| DispatchError::UnknownController(controller.clone()))?;
        let types = self
            .shared
            .types
            .load(&self.shared.registry, &controller, &method)?;

        // the same body, re-read under the argument schema this time
        let wire_args = body
            .get("args")
            .cloned()
            .unwrap_or_else(|| Value::Object(Vec::new()));
        let args = types.args_decode.decode(&wire_args);
        let failures = types.args_validate.validate(&args);
        if !failures.is_empty() {
            debug!(%controller, %method, count = failures.len(), "arguments rejected");
            return Err(DispatchError::Validation(failures));
        }

        let instance = self.shared.injector.get(&class)?;
        if let Some(guard) = &self.shared.guard {
            guard.allow(&controller, &method)?;
        }

        trace!(%controller, %method, id = frame.id, "invoking");
        let outcome = instance.call(&method, args).await?;
        match outcome {
            ActionOutcome::Entity(v) => {
                self.shared
                    .sender
                    .reply(frame.id, FrameKind::ResponseEntity, &ResultBody { v })?;
            }
            ActionOutcome::Collection(collection) => {
                self.open_collection(frame.id, collection, &types)?;
            }
            ActionOutcome::Observable(source) => {
                self.open_observable(frame.id, source)?;
            }
            ActionOutcome::Value(v) => {
                self.shared
                    .sender
                    .reply(frame.id, FrameKind::ResponseActionSimple, &ResultBody { v })?;
            }
        }
        Ok(())
    }

    /// Side-effect free beyond populating the type cache
    pub(crate) fn handle_action_types(&self, frame: &Frame) -> Result<(), DispatchError> {
        let body: Value = frame.decode_body()?;
        let (controller, method) = parse_call(&body)?;
        let types = self
            .shared
            .types
            .load(&self.shared.registry, &controller, &method)?;
        self.shared.sender.reply(
            frame.id,
            FrameKind::ResponseActionType,
            &TypeDescription {
                parameters: types.parameters.clone(),
                result: types.result.clone(),
            },
        )?;
        Ok(())
    }
}
