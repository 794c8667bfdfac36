//! Token dispatch
//!
//! Probes an activated token against a list of routes. Routine errors mean
//! "not mine" and move on to the next route; anything else aborts.

use tracing::{debug, trace};

use crate::codec::{CallbackCodec, Decoded};
use crate::error::CodecError;
use crate::schema::{Schema, SchemaRegistry};

type Handler<C, R> = Box<dyn Fn(&C, Decoded) -> R + Send + Sync>;

struct Route<C, R> {
    schema: Schema,
    handler: Handler<C, R>,
}

/// Ordered list of schema-bound handlers
pub struct Router<C, R> {
    routes: Vec<Route<C, R>>,
}

impl<C, R> Default for Router<C, R> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<C, R> Router<C, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; earlier routes are probed first
    pub fn route<F>(mut self, schema: Schema, handler: F) -> Self
    where
        F: Fn(&C, Decoded) -> R + Send + Sync + 'static,
    {
        self.routes.push(Route {
            schema,
            handler: Box::new(handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registry of every routed schema, for building a matching codec
    pub fn registry(&self) -> Result<SchemaRegistry, CodecError> {
        let mut registry = SchemaRegistry::new();
        for route in &self.routes {
            registry.register(route.schema.clone())?;
        }
        Ok(registry)
    }

    /// Decode `token` and run the first handler whose schema accepts it.
    ///
    /// Returns `Ok(None)` when no route matches. The token is resolved once
    /// up front, so an unresolvable reference fails instead of falling
    /// through every route.
    pub fn dispatch(
        &self,
        codec: &CallbackCodec,
        token: &str,
        context: &C,
    ) -> Result<Option<R>, CodecError> {
        let resolved = codec.resolve(token)?;
        for route in &self.routes {
            match codec.decode_as(&resolved, &route.schema) {
                Ok(decoded) => {
                    debug!(identifier = %route.schema.identifier, "Dispatching callback");
                    return Ok(Some((route.handler)(context, decoded)));
                }
                Err(err) if err.is_routine() => {
                    trace!(identifier = %route.schema.identifier, error = %err, "Route declined");
                }
                Err(err) => return Err(err),
            }
        }
        debug!("No route matched");
        Ok(None)
    }
}
