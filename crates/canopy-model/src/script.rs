//! Script engine interface and a small reference engine.
//!
//! A script is a tree. [`BasicEngine`] runs the children of the script node
//! in order as actions; every `select` attribute is a [`query`](crate::query)
//! evaluated against the context node and the current scope.
//!
//! | Action   | Attributes                   | Effect                                             |
//! |----------|------------------------------|----------------------------------------------------|
//! | `assign` | `name`, `select`             | bind the query result to `$name`                   |
//! | `set`    | `select`, `name`, `value`    | set attribute `name` on every selected node        |
//! | `add`    | `select`                     | deep-copy the action's children under each target  |
//! | `remove` | `select`                     | delete every selected node                         |
//! | `return` | `select`                     | append the query result to the results             |
//! | `fail`   | `message`                    | abort with a [`ScriptError`]                       |

use crate::error::{ModelError, ScriptError};
use crate::model::Model;
use crate::node::NodeKey;
use crate::query::Query;
use crate::value::{Scope, Value};

/// Runs scripts against a model.
pub trait ScriptEngine: Send + Sync {
    /// Run `script` with `context` as the query context node.
    ///
    /// Returns the values the script explicitly returned, in order. The
    /// scope is updated in place.
    fn run(
        &self,
        model: &mut Model,
        scope: &mut Scope,
        context: NodeKey,
        script: NodeKey,
    ) -> Result<Vec<Value>, ScriptError>;
}

/// The bundled action interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEngine;

impl BasicEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for BasicEngine {
    fn run(
        &self,
        model: &mut Model,
        scope: &mut Scope,
        context: NodeKey,
        script: NodeKey,
    ) -> Result<Vec<Value>, ScriptError> {
        let script_type = model
            .type_name(script)
            .ok_or_else(|| ScriptError::new("script node does not exist", "script"))?
            .to_string();

        let mut results = Vec::new();
        let actions = model.children(script).to_vec();
        let mut ordinals: Vec<(String, usize)> = Vec::new();

        for action in actions {
            let kind = model.type_name(action).unwrap_or_default().to_string();
            let ordinal = match ordinals.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, n)) => {
                    *n += 1;
                    *n
                }
                None => {
                    ordinals.push((kind.clone(), 1));
                    1
                }
            };
            let at = Action {
                key: action,
                context,
                location: format!("{}/{}[{}]", script_type, kind, ordinal),
            };

            match kind.as_str() {
                "assign" => {
                    let name = at.required(model, "name")?;
                    let value = at.select(model, scope)?;
                    scope.set(name, value);
                }
                "set" => {
                    let name = at.required(model, "name")?;
                    let value = at.required(model, "value")?;
                    for node in at.select_nodes(model, scope)? {
                        model
                            .set_attribute(node, &name, value.clone())
                            .map_err(|e| at.fail(e))?;
                    }
                }
                "add" => {
                    let templates = model.children(action).to_vec();
                    for target in at.select_nodes(model, scope)? {
                        for template in &templates {
                            let fragment = model.to_fragment(*template).map_err(|e| at.fail(e))?;
                            let copy = model.instantiate(&fragment);
                            model.add_child(target, copy, None).map_err(|e| at.fail(e))?;
                        }
                    }
                }
                "remove" => {
                    for node in at.select_nodes(model, scope)? {
                        model.delete(node).map_err(|e| at.fail(e))?;
                    }
                }
                "return" => results.push(at.select(model, scope)?),
                "fail" => {
                    let message = model
                        .attribute(action, "message")
                        .unwrap_or("script failed")
                        .to_string();
                    return Err(ScriptError::new(message, at.location));
                }
                other => {
                    return Err(ScriptError::new(
                        format!("unknown action '{}'", other),
                        at.location,
                    ));
                }
            }
        }
        Ok(results)
    }
}

struct Action {
    key: NodeKey,
    context: NodeKey,
    location: String,
}

impl Action {
    fn fail(&self, err: ModelError) -> ScriptError {
        match err {
            ModelError::Script(inner) => inner,
            other => ScriptError::new(other.to_string(), self.location.clone()),
        }
    }

    fn required(&self, model: &Model, name: &str) -> Result<String, ScriptError> {
        model
            .attribute(self.key, name)
            .map(str::to_owned)
            .ok_or_else(|| {
                ScriptError::new(format!("missing attribute '{}'", name), self.location.clone())
            })
    }

    fn select(&self, model: &Model, scope: &Scope) -> Result<Value, ScriptError> {
        let source = self.required(model, "select")?;
        Query::parse(&source)
            .and_then(|q| q.evaluate(model, self.context, Some(scope)))
            .map_err(|e| self.fail(e))
    }

    fn select_nodes(&self, model: &Model, scope: &Scope) -> Result<Vec<NodeKey>, ScriptError> {
        match self.select(model, scope)? {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(ScriptError::new(
                format!("expected a node-set, got a {}", other.type_name()),
                self.location.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        model: Model,
        config: NodeKey,
        script: NodeKey,
    }

    fn fixture() -> Fixture {
        let mut model = Model::new();
        let config = model.create_node("config");
        model.add_child(model.root(), config, None).unwrap();
        for id in ["a", "b"] {
            let item = model.create_node("item");
            model.set_attribute(item, "id", id).unwrap();
            model.add_child(config, item, None).unwrap();
        }
        let script = model.create_node("script");
        Fixture {
            model,
            config,
            script,
        }
    }

    fn action(model: &mut Model, script: NodeKey, kind: &str, attrs: &[(&str, &str)]) -> NodeKey {
        let node = model.create_node(kind);
        for (k, v) in attrs {
            model.set_attribute(node, k, *v).unwrap();
        }
        model.add_child(script, node, None).unwrap();
        node
    }

    #[test]
    fn test_assign_and_return() {
        let Fixture {
            mut model,
            script,
            ..
        } = fixture();
        let root = model.root();
        action(&mut model, script, "assign", &[("name", "x"), ("select", "/config/item")]);
        action(&mut model, script, "return", &[("select", "$x")]);

        let mut scope = Scope::new();
        let results = BasicEngine.run(&mut model, &mut scope, root, script).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_nodes().unwrap().len(), 2);
        assert_eq!(scope.get("x"), Some(&results[0]));
    }

    #[test]
    fn test_set_add_remove() {
        let Fixture {
            mut model,
            config,
            script,
        } = fixture();
        let root = model.root();
        action(
            &mut model,
            script,
            "set",
            &[("select", "/config/item"), ("name", "seen"), ("value", "1")],
        );
        let add = action(&mut model, script, "add", &[("select", "/config")]);
        let template = model.create_node("item");
        model.set_attribute(template, "id", "c").unwrap();
        model.add_child(add, template, None).unwrap();
        action(&mut model, script, "remove", &[("select", "/config/item[@id='a']")]);

        BasicEngine.run(&mut model, &mut Scope::new(), root, script).unwrap();
        model.flush();

        let ids: Vec<_> = model
            .children(config)
            .iter()
            .map(|k| model.attribute(*k, "id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(model.attribute(model.children(config)[0], "seen"), Some("1"));
    }

    #[test]
    fn test_fail_reports_location() {
        let Fixture {
            mut model,
            script,
            ..
        } = fixture();
        let root = model.root();
        action(&mut model, script, "fail", &[("message", "first")]);
        let err = BasicEngine
            .run(&mut model, &mut Scope::new(), root, script)
            .unwrap_err();
        assert_eq!(err.message, "first");
        assert_eq!(err.location, "script/fail[1]");
    }

    #[test]
    fn test_location_counts_same_kind() {
        let Fixture {
            mut model,
            script,
            ..
        } = fixture();
        let root = model.root();
        action(&mut model, script, "return", &[("select", "1")]);
        action(&mut model, script, "return", &[("select", "item[")]);
        let err = BasicEngine
            .run(&mut model, &mut Scope::new(), root, script)
            .unwrap_err();
        assert_eq!(err.location, "script/return[2]");
    }

    #[test]
    fn test_unknown_action() {
        let Fixture {
            mut model,
            script,
            ..
        } = fixture();
        let root = model.root();
        action(&mut model, script, "explode", &[]);
        let err = BasicEngine
            .run(&mut model, &mut Scope::new(), root, script)
            .unwrap_err();
        assert!(err.message.contains("explode"));
    }
}
