//! Execute: run a script on the remote tree.
//!
//! The requester ships the selected variables and a deep copy of the script
//! node. The responder runs it in a fresh scope with the document root as
//! context, then returns every variable in scope and the returned values.
//! Node-set values travel as deep copies in both directions.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::{Fragment, Message, WireValue};
use canopy_model::{ModelError, NodeKey, Scope, Value};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{PendingRequest, Reply};
use crate::error::{Result, SyncError};
use crate::mirror;
use crate::peer::Peer;

/// Outcome of a callback-style execution.
#[derive(Debug)]
pub struct Execution {
    /// The caller's scope with the returned bindings applied.
    pub scope: Scope,
    /// Values the script returned, in order.
    pub results: Vec<Value>,
}

impl Peer {
    /// Execute with the configured default timeout.
    pub async fn execute(&self, scope: &mut Scope, names: &[&str], script: NodeKey) -> Result<Vec<Value>> {
        self.execute_timeout(scope, names, script, self.config().default_timeout())
            .await
    }

    /// Run the local `script` node on the remote tree.
    ///
    /// Sends the variables in `names` (every variable when empty). On success
    /// the returned bindings are written back into `scope` and the script's
    /// returned values are yielded. Returned node-sets are new detached
    /// nodes in the local model.
    pub async fn execute_timeout(
        &self,
        scope: &mut Scope,
        names: &[&str],
        script: NodeKey,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let selected: Vec<(String, Value)> = if names.is_empty() {
            scope
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect()
        } else {
            names
                .iter()
                .map(|name| {
                    scope
                        .get(name)
                        .map(|value| (name.to_string(), value.clone()))
                        .ok_or_else(|| ModelError::UnboundVariable(name.to_string()))
                })
                .collect::<std::result::Result<_, _>>()?
        };

        let (variables, script) = self
            .dispatcher()
            .with_model(move |model| -> Result<(Vec<(String, WireValue)>, Fragment)> {
                let mut variables = Vec::with_capacity(selected.len());
                for (name, value) in &selected {
                    variables.push((name.clone(), mirror::to_wire(model, value)?));
                }
                Ok((variables, model.to_fragment(script)?))
            })
            .await??;

        let reply = self
            .request(PendingRequest::Execute, timeout, |correlation| {
                Message::ExecuteRequest {
                    correlation,
                    variables,
                    script,
                }
            })
            .await?;
        match reply {
            Reply::Execute { variables, results } => {
                for (name, value) in variables {
                    scope.set(name, value);
                }
                Ok(results)
            }
            other => Err(other.unexpected()),
        }
    }

    /// Callback form of [`Peer::execute`]: runs the request on a task and
    /// hands the outcome to `callback`.
    pub fn execute_with<F>(
        self: &Arc<Self>,
        mut scope: Scope,
        names: Vec<String>,
        script: NodeKey,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Execution>) + Send + 'static,
    {
        let peer = self.clone();
        tokio::spawn(async move {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let outcome = peer
                .execute(&mut scope, &names, script)
                .await
                .map(|results| Execution { scope, results });
            callback(outcome);
        })
    }
}

pub(crate) fn respond(
    peer: &Arc<Peer>,
    correlation: u32,
    variables: Vec<(String, WireValue)>,
    script: Fragment,
) {
    super::respond(peer, correlation, move |ctx, peer| {
        let engine = ctx.engine.clone();
        let model = &mut ctx.model;

        let mut scope = Scope::new();
        let mut temporaries = Vec::new();
        for (name, value) in &variables {
            let local = mirror::materialize(model, value);
            if let Value::Nodes(keys) = &local {
                temporaries.extend(keys.iter().copied());
            }
            scope.set(name.clone(), local);
        }
        let script_key = model.instantiate(&script);
        temporaries.push(script_key);

        let context = model.root();
        let outcome = engine
            .run(model, &mut scope, context, script_key)
            .map_err(|err| {
                warn!(peer = %peer.id(), location = %err.location, error = %err.message, "remote execution failed");
                SyncError::from(ModelError::Script(err))
            })
            .and_then(|results| {
                let mut bindings = Vec::with_capacity(scope.len());
                for (name, value) in scope.iter() {
                    bindings.push((name.to_string(), mirror::to_wire(model, value)?));
                }
                let results = results
                    .iter()
                    .map(|value| mirror::to_wire(model, value))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Message::ExecuteResponse {
                    correlation,
                    variables: bindings,
                    results,
                })
            });

        // Temporaries the script attached to the tree stay.
        for key in temporaries {
            if model.contains(key) && model.parent(key).is_none() {
                let _ = model.delete(key);
            }
        }
        outcome
    });
}

pub(crate) fn complete(
    peer: &Arc<Peer>,
    correlation: u32,
    variables: Vec<(String, WireValue)>,
    results: Vec<WireValue>,
) {
    super::complete(peer, correlation, move |ctx, _, _| {
        let variables = variables
            .iter()
            .map(|(name, value)| (name.clone(), mirror::materialize(&mut ctx.model, value)))
            .collect();
        let results = results
            .iter()
            .map(|value| mirror::materialize(&mut ctx.model, value))
            .collect();
        Ok(Reply::Execute { variables, results })
    });
}
