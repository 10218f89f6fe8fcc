//! Resolution context
//!
//! Everything the passes know about the environment a routine runs in:
//! which globals are statically-known constants, which zero-argument
//! routines may be spliced into their call sites, and which names exist at
//! all. A context is built once, validated, and then shared read-only by any
//! number of pipeline runs.

use crate::code::CodeObject;
use crate::error::{RewriteError, RewriteResult, Role};
use crate::passes::verify_bounds;
use crate::value::{Builtin, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Validated resolution context
#[derive(Debug, Clone, Default)]
pub struct Context {
    namespace: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    inline: HashMap<String, Arc<CodeObject>>,
    debug: bool,
}

impl Context {
    /// Start building a context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Statically-known value bound to `name`
    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// Body to splice in place of zero-argument calls to `name`
    pub fn inline_body(&self, name: &str) -> Option<&Arc<CodeObject>> {
        self.inline.get(name)
    }

    /// Run-time binding of `name`
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.namespace.get(name)
    }

    /// Returns true if a global load of `name` can succeed
    pub fn resolves(&self, name: &str) -> bool {
        self.namespace.contains_key(name) || Builtin::is_builtin(name)
    }

    /// Module-level bindings
    pub fn namespace(&self) -> &HashMap<String, Value> {
        &self.namespace
    }

    pub fn constants(&self) -> &HashMap<String, Value> {
        &self.constants
    }

    pub fn inline_table(&self) -> &HashMap<String, Arc<CodeObject>> {
        &self.inline
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// Builder for [`Context`]
///
/// Registration never fails; every check runs in [`ContextBuilder::build`].
#[derive(Debug, Default)]
pub struct ContextBuilder {
    namespace: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    inline: HashMap<String, Arc<CodeObject>>,
    debug: bool,
    conflict: Option<RewriteError>,
}

impl ContextBuilder {
    /// Bind `name` to a statically-known value
    ///
    /// The binding is also visible at run time.
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if self.inline.contains_key(&name) {
            self.record_conflict(&name, Role::Inline, Role::Constant);
        }
        self.namespace.insert(name.clone(), value.clone());
        self.constants.insert(name, value);
        self
    }

    /// Mark `name` for inlining at its zero-argument call sites
    ///
    /// The routine stays callable at run time under the same name.
    pub fn inline(mut self, name: impl Into<String>, body: CodeObject) -> Self {
        let name = name.into();
        if self.constants.contains_key(&name) {
            self.record_conflict(&name, Role::Constant, Role::Inline);
        }
        let body = Arc::new(body);
        self.namespace
            .insert(name.clone(), Value::Function(Arc::clone(&body)));
        self.inline.insert(name, body);
        self
    }

    /// Bind `name` at run time only
    pub fn namespace(mut self, name: impl Into<String>, value: Value) -> Self {
        self.namespace.insert(name.into(), value);
        self
    }

    /// Register every builtin as a constant
    pub fn with_builtins(mut self) -> Self {
        for builtin in Builtin::ALL {
            self = self.constant(builtin.name(), Value::Builtin(builtin));
        }
        self
    }

    /// Log the listing after every pass
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn record_conflict(&mut self, name: &str, existing: Role, requested: Role) {
        if self.conflict.is_none() {
            self.conflict = Some(RewriteError::ConflictingRole {
                name: name.to_string(),
                existing,
                requested,
            });
        }
    }

    /// Validate and freeze the context
    ///
    /// Fails if a name was given two roles, an inline body indexes past one
    /// of its tables, or the inline table reaches a routine from itself.
    pub fn build(self) -> RewriteResult<Context> {
        if let Some(conflict) = self.conflict {
            return Err(conflict);
        }

        let mut names: Vec<&String> = self.inline.keys().collect();
        names.sort();
        for name in &names {
            if let Some(err) = verify_bounds(&self.inline[*name]).into_iter().next() {
                return Err(RewriteError::Uninlinable {
                    name: (*name).clone(),
                    reason: err.to_string(),
                });
            }
        }

        let mut state: HashMap<&str, Visit> = HashMap::new();
        for name in &names {
            visit(name, &self.inline, &mut state)?;
        }

        Ok(Context {
            namespace: self.namespace,
            constants: self.constants,
            inline: self.inline,
            debug: self.debug,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Depth-first walk over "body loads inline routine" edges
fn visit<'a>(
    name: &'a str,
    inline: &'a HashMap<String, Arc<CodeObject>>,
    state: &mut HashMap<&'a str, Visit>,
) -> RewriteResult<()> {
    match state.get(name) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => return Err(RewriteError::InlineCycle(name.to_string())),
        None => {}
    }
    state.insert(name, Visit::InProgress);

    if let Some(body) = inline.get(name) {
        for callee in inline_callees(body, inline) {
            visit(callee, inline, state)?;
        }
    }

    state.insert(name, Visit::Done);
    Ok(())
}

/// Inline-table names a body loads as globals
fn inline_callees<'a>(
    body: &CodeObject,
    inline: &'a HashMap<String, Arc<CodeObject>>,
) -> Vec<&'a str> {
    let Ok(instructions) = body.decode() else {
        return Vec::new();
    };
    instructions
        .iter()
        .filter(|i| i.opcode == crate::bytecode::Opcode::LoadGlobal)
        .filter_map(|i| body.names.get(i.operand as usize))
        .filter_map(|name| inline.get_key_value(name.as_str()).map(|(k, _)| k.as_str()))
        .collect()
}
