//! Per-action type derivation and caching
//!
//! For each `(controller, action)` pair the dispatcher derives an
//! [`ActionTypes`] bundle: the argument schema with its compiled decoder
//! and validator, the result schema, and the stream item schema. Wrapper
//! return declarations (future, stream, collection) are unwrapped a single
//! level; the wrapper itself never appears on the wire.
//!
//! Bundles are derived once and memoized for the life of the dispatcher.
//! Entries are never mutated after insertion; the one lazily derived piece,
//! the collection items schema, sits behind a `OnceLock`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::registry::ControllerRegistry;
use crate::schema::{ArgsDecoder, ArgsValidator, Descriptor, ObjectSchema, TypeKind};
use crate::server::DispatchError;

/// The derived codec/validator bundle of one action
#[derive(Debug)]
pub struct ActionTypes {
    /// Parameter declarations, in call order
    pub parameters: Vec<Descriptor>,
    /// Schema of the named-argument object
    pub args_schema: ObjectSchema,
    /// Declaration of the unwrapped return value, renamed to `v`
    pub result: Descriptor,
    /// Single-property schema `{ v }` for single-value results
    pub result_schema: ObjectSchema,
    /// Schema `{ id, v }` for streamed items
    pub stream_item_schema: ObjectSchema,
    /// Compiled wire-to-native argument decoder
    pub args_decode: ArgsDecoder,
    /// Compiled argument validator
    pub args_validate: ArgsValidator,
    collection_items: OnceLock<ObjectSchema>,
}

impl ActionTypes {
    /// Schema `{ v: array<result> }` for collection snapshots, derived on
    /// the first collection result of this action
    pub fn collection_items_schema(&self) -> &ObjectSchema {
        self.collection_items.get_or_init(|| {
            let mut schema = ObjectSchema::new();
            schema.register(Descriptor::optional(
                "v",
                TypeKind::Array(Box::new(self.result.kind.clone())),
            ));
            schema
        })
    }
}

/// The standard streamed-item base schema, before the value property is
/// registered onto it
fn stream_item_base() -> ObjectSchema {
    let mut schema = ObjectSchema::new();
    schema.register(Descriptor::new("id", TypeKind::Int));
    schema
}

fn derive(
    parameters: Vec<Descriptor>,
    declared: &Descriptor,
    method: &str,
) -> Result<ActionTypes, DispatchError> {
    let mut args_schema = ObjectSchema::new();
    for parameter in &parameters {
        args_schema.register(parameter.clone());
    }

    let mut result = declared.clone();
    if let Some((wrapper, element)) = declared.kind.wrapper() {
        let Some(element) = element else {
            return Err(DispatchError::MissingGeneric {
                method: method.to_string(),
                wrapper,
            });
        };
        // unwrapping is single-level; a nested wrapper is rejected outright
        if let Some((inner, _)) = element.wrapper() {
            return Err(DispatchError::MissingGeneric {
                method: method.to_string(),
                wrapper: inner,
            });
        }
        result.kind = element.clone();
    }
    let mut result = result.renamed("v");
    result.optional = true;

    let mut result_schema = ObjectSchema::new();
    result_schema.register(result.clone());

    let mut stream_item_schema = stream_item_base();
    stream_item_schema.register(result.clone());

    let args_decode = ArgsDecoder::compile(&args_schema);
    let args_validate = ArgsValidator::compile(&args_schema);

    Ok(ActionTypes {
        parameters,
        args_schema,
        result,
        result_schema,
        stream_item_schema,
        args_decode,
        args_validate,
        collection_items: OnceLock::new(),
    })
}

/// Append-only memoization of [`ActionTypes`] per `(controller, action)`
#[derive(Default)]
pub struct TypeCache {
    cache: Mutex<HashMap<(String, String), Arc<ActionTypes>>>,
}

impl TypeCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the bundle for an action, deriving and memoizing it on first
    /// use.
    ///
    /// Fails with [`DispatchError::UnknownController`],
    /// [`DispatchError::UnknownAction`], or
    /// [`DispatchError::MissingGeneric`]. A partially derived bundle is
    /// never observable; the cache is only populated with complete entries.
    pub fn load(
        &self,
        registry: &ControllerRegistry,
        controller: &str,
        method: &str,
    ) -> Result<Arc<ActionTypes>, DispatchError> {
        let class = registry
            .get(controller)
            .ok_or_else(|| DispatchError::UnknownController(controller.to_string()))?;
        let (parameters, declared) = match (class.parameters_of(method), class.result_of(method)) {
            (Some(parameters), Some(declared)) => (parameters.to_vec(), declared.clone()),
            _ => {
                return Err(DispatchError::UnknownAction {
                    controller: controller.to_string(),
                    method: method.to_string(),
                })
            }
        };
        let key = (controller.to_string(), method.to_string());
        let mut cache = self.cache.lock().unwrap();
        if let Some(types) = cache.get(&key) {
            return Ok(types.clone());
        }
        let types = Arc::new(derive(parameters, &declared, method)?);
        cache.insert(key, types.clone());
        Ok(types)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::ControllerClass;

    fn registry() -> ControllerRegistry {
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
                .action(
                    "ticks",
                    vec![],
                    Descriptor::new("return", TypeKind::Stream(Some(Box::new(TypeKind::Int)))),
                )
                .action(
                    "broken",
                    vec![],
                    Descriptor::new("return", TypeKind::Stream(None)),
                )
                .action(
                    "nested",
                    vec![],
                    Descriptor::new(
                        "return",
                        TypeKind::Future(Some(Box::new(TypeKind::Stream(None)))),
                    ),
                ),
        );
        registry
    }

    #[test]
    fn plain_result_kept_as_is() {
        let cache = TypeCache::new();
        let types = cache.load(&registry(), "c1", "add").unwrap();
        assert_eq!(types.parameters.len(), 2);
        assert_eq!(types.result.name, "v");
        assert_eq!(types.result.kind, TypeKind::Int);
        assert!(types.result.optional);
        assert_eq!(types.result_schema.get("v").unwrap().kind, TypeKind::Int);
    }

    #[test]
    fn wrapper_result_unwrapped() {
        let cache = TypeCache::new();
        let types = cache.load(&registry(), "c1", "ticks").unwrap();
        assert_eq!(types.result.kind, TypeKind::Int);
        // stream items carry the id property first, then the value
        let props = types.stream_item_schema.properties();
        assert_eq!(props[0].name, "id");
        assert_eq!(props[1].name, "v");
    }

    #[test]
    fn missing_element_rejected() {
        let cache = TypeCache::new();
        let err = cache.load(&registry(), "c1", "broken").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken"));
        assert!(msg.contains("stream"));
    }

    #[test]
    fn nested_wrapper_rejected() {
        let cache = TypeCache::new();
        assert!(matches!(
            cache.load(&registry(), "c1", "nested"),
            Err(DispatchError::MissingGeneric { .. })
        ));
    }

    #[test]
    fn unknown_lookups_fail() {
        let cache = TypeCache::new();
        assert!(matches!(
            cache.load(&registry(), "nope", "add"),
            Err(DispatchError::UnknownController(_))
        ));
        assert!(matches!(
            cache.load(&registry(), "c1", "nope"),
            Err(DispatchError::UnknownAction { .. })
        ));
    }

    #[test]
    fn load_is_memoized() {
        let cache = TypeCache::new();
        let registry = registry();
        let first = cache.load(&registry, "c1", "add").unwrap();
        let second = cache.load(&registry, "c1", "add").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn collection_items_schema_is_lazy_and_stable() {
        let cache = TypeCache::new();
        let types = cache.load(&registry(), "c1", "add").unwrap();
        let first = types.collection_items_schema() as *const _;
        let second = types.collection_items_schema() as *const _;
        assert_eq!(first, second);
        assert_eq!(
            types.collection_items_schema().get("v").unwrap().kind,
            TypeKind::Array(Box::new(TypeKind::Int))
        );
    }
}
