//! Reactive records with nested scopes.

use crate::key_outlet::{KeyOutlet, KeyOutlets};
use crate::streamlet::{
    Coherence, Inlet, KeyEffect, MapInlet, MapOutlet, Outlet, OutputSet, Streamlet, Version,
};
use crate::value::Value;
use crate::wave;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tidal_btree::Tree;
use tidal_common::{Result, TidalError};
use tracing::trace;

/// One named member of a record.
#[derive(Clone)]
enum Member {
    /// Constant value.
    Value(Value),
    /// Nested record, watched so that its changes mark this member stale.
    Nested(Rc<MemberInlet>),
    /// Read-only member following an upstream outlet.
    Bound(Rc<MemberInlet>),
}

impl Member {
    fn inlet(&self) -> Option<&Rc<MemberInlet>> {
        match self {
            Member::Value(_) => None,
            Member::Nested(inlet) | Member::Bound(inlet) => Some(inlet),
        }
    }

    fn value(&self) -> Option<Value> {
        match self {
            Member::Value(value) => Some(value.clone()),
            Member::Nested(inlet) | Member::Bound(inlet) => inlet.value(),
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Member::Value(a), Member::Value(b)) => a == b,
            (Member::Nested(a), Member::Nested(b)) | (Member::Bound(a), Member::Bound(b)) => {
                Rc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

/// Binding from an upstream outlet into one member of a record.
struct MemberInlet {
    this: Weak<Self>,
    record: Weak<RecordOutlet>,
    name: String,
    input: RefCell<Option<Rc<dyn Outlet<Value>>>>,
}

impl MemberInlet {
    fn attach(record: Weak<RecordOutlet>, name: String, input: Rc<dyn Outlet<Value>>) -> Rc<Self> {
        let inlet = Rc::new_cyclic(|this: &Weak<Self>| Self {
            this: this.clone(),
            record,
            name,
            input: RefCell::new(None),
        });
        input.bind_output(inlet.as_inlet());
        *inlet.input.borrow_mut() = Some(input);
        inlet
    }

    fn as_inlet(&self) -> Weak<dyn Inlet> {
        self.this.clone()
    }

    fn input(&self) -> Option<Rc<dyn Outlet<Value>>> {
        self.input.borrow().clone()
    }

    fn value(&self) -> Option<Value> {
        self.input()?.get()
    }

    /// Unregisters from the upstream outlet and returns it.
    fn detach(&self) -> Option<Rc<dyn Outlet<Value>>> {
        let input = self.input.replace(None)?;
        input.unbind_output(&self.as_inlet());
        Some(input)
    }
}

impl Inlet for MemberInlet {
    fn decohere_output(&self) {
        if let Some(record) = self.record.upgrade() {
            record.decohere_input_key(&self.name, KeyEffect::Update);
        }
    }

    fn recohere_output(&self, version: Version) {
        if let Some(record) = self.record.upgrade() {
            record.recohere_input_key(&self.name, version);
        }
    }

    fn unbind_input(&self) {
        if self.detach().is_some() {
            self.decohere_output();
        }
    }

    fn disconnect_output(&self) {
        self.input.replace(None);
        if let Some(record) = self.record.upgrade() {
            record.disconnect_outputs();
        }
    }
}

/// Ordered record of named members that is itself a keyed outlet.
///
/// Members are kept in a [`Tree`] ordered by name. A member is either a
/// constant [`Value`], a nested record, or bound to an upstream
/// `Outlet<Value>`. Nested records see this record as their enclosing scope,
/// so [`RecordOutlet::resolve`] finds names defined further out.
pub struct RecordOutlet {
    this: Weak<Self>,
    scope: RefCell<Weak<RecordOutlet>>,
    members: RefCell<Tree<String, Member>>,
    effects: RefCell<Tree<String, KeyEffect>>,
    coherence: Coherence,
    outputs: OutputSet<String>,
    key_outlets: KeyOutlets<String, Value>,
}

impl RecordOutlet {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            scope: RefCell::new(Weak::new()),
            members: RefCell::new(Tree::new()),
            effects: RefCell::new(Tree::new()),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
            key_outlets: KeyOutlets::new(),
        })
    }

    /// Record whose unresolved names are looked up in `scope`.
    pub fn with_scope(scope: &Rc<RecordOutlet>) -> Rc<Self> {
        let record = Self::new();
        record.set_scope(Some(scope));
        record
    }

    /// The enclosing scope, if it is still alive.
    pub fn scope(&self) -> Option<Rc<RecordOutlet>> {
        self.scope.borrow().upgrade()
    }

    pub fn set_scope(&self, scope: Option<&Rc<RecordOutlet>>) {
        *self.scope.borrow_mut() = scope.map(Rc::downgrade).unwrap_or_default();
    }

    fn member(&self, name: &str) -> Option<Member> {
        self.members.borrow().get(&name.to_string()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.borrow().has(&name.to_string())
    }

    /// Returns true if `name` follows an upstream outlet.
    pub fn is_bound(&self, name: &str) -> bool {
        matches!(self.member(name), Some(Member::Bound(_)))
    }

    /// Current value of member `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.member(name)?.value()
    }

    /// Sets member `name` to a constant value. Returns false if the member
    /// already held an equal value.
    ///
    /// Fails with `UnsupportedOperation` if the member is bound to an
    /// upstream outlet, or if `value` is this record or one of its scopes.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<bool> {
        let name = name.into();
        let value = value.into();
        let existing = self.member(&name);
        match &existing {
            Some(Member::Bound(_)) => {
                return Err(TidalError::UnsupportedOperation(format!(
                    "set on bound member {name}"
                )));
            }
            Some(Member::Value(current)) if *current == value => return Ok(false),
            Some(Member::Nested(inlet)) if inlet.value().as_ref() == Some(&value) => {
                return Ok(false);
            }
            _ => {}
        }

        let member = match value {
            Value::Record(child) => {
                if self.encloses(&child) {
                    return Err(TidalError::UnsupportedOperation(format!(
                        "record member {name} would contain itself"
                    )));
                }
                child.set_scope(Some(&self.strong()?));
                let input: Rc<dyn Outlet<Value>> = child;
                Member::Nested(MemberInlet::attach(self.this.clone(), name.clone(), input))
            }
            value => Member::Value(value),
        };
        self.release(existing);
        self.install(name, member);
        Ok(true)
    }

    /// Binds member `name` to follow `input`. The member becomes read-only.
    pub fn bind(&self, name: impl Into<String>, input: Rc<dyn Outlet<Value>>) {
        let name = name.into();
        let existing = self.member(&name);
        let member = Member::Bound(MemberInlet::attach(self.this.clone(), name.clone(), input));
        self.release(existing);
        self.install(name, member);
    }

    /// Removes member `name`, detaching it from any upstream outlet.
    /// Returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let key = name.to_string();
        let existing = {
            let mut members = self.members.borrow_mut();
            let existing = members.get(&key).cloned();
            *members = members.delete(&key).1;
            existing
        };
        if existing.is_none() {
            return false;
        }
        self.release(existing);
        wave::note_write();
        self.decohere_input_key(&key, KeyEffect::Remove);
        true
    }

    /// Nested record stored under `name`.
    ///
    /// Absent members are `Ok(None)`; members holding anything other than
    /// a record fail with `TypeMismatch`.
    pub fn member_record(&self, name: &str) -> Result<Option<Rc<RecordOutlet>>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value.as_record().map(|record| Some(record.clone())),
        }
    }

    /// Looks `name` up in this record, then in each enclosing scope.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if self.contains(name) {
            return self.get(name);
        }
        self.scope()?.resolve(name)
    }

    /// Key outlet of the nearest record in the scope chain defining `name`.
    pub fn resolve_outlet(&self, name: &str) -> Option<Rc<KeyOutlet<String, Value>>> {
        if self.contains(name) {
            return Some(self.outlet(&name.to_string()));
        }
        self.scope()?.resolve_outlet(name)
    }

    /// Member names in ascending order.
    pub fn names(&self) -> Vec<String> {
        self.members.borrow().keys().collect()
    }

    fn strong(&self) -> Result<Rc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| TidalError::UnsupportedOperation("record is being dropped".to_string()))
    }

    /// Returns true if `record` is this record or one of its scopes.
    fn encloses(&self, record: &Rc<RecordOutlet>) -> bool {
        if std::ptr::eq(Rc::as_ptr(record), self) {
            return true;
        }
        let mut scope = self.scope();
        while let Some(current) = scope {
            if Rc::ptr_eq(&current, record) {
                return true;
            }
            scope = current.scope();
        }
        false
    }

    fn install(&self, name: String, member: Member) {
        {
            let mut members = self.members.borrow_mut();
            let next = members.set(name.clone(), member);
            *members = next;
        }
        wave::note_write();
        self.decohere_input_key(&name, KeyEffect::Update);
    }

    fn release(&self, member: Option<Member>) {
        match member {
            Some(Member::Nested(inlet)) => {
                if let Some(child) = inlet.detach() {
                    if let Some(Value::Record(record)) = child.get() {
                        if record.scope().is_some_and(|scope| std::ptr::eq(Rc::as_ptr(&scope), self)) {
                            record.set_scope(None);
                        }
                    }
                }
            }
            Some(Member::Bound(inlet)) => {
                inlet.detach();
            }
            _ => {}
        }
    }

    fn record_effect(&self, key: &String, effect: KeyEffect) -> bool {
        let mut effects = self.effects.borrow_mut();
        let next = effects.set(key.clone(), effect);
        if next.ptr_eq(&effects) {
            return false;
        }
        *effects = next;
        true
    }

    fn take_effect(&self, key: &String) -> bool {
        let mut effects = self.effects.borrow_mut();
        let (taken, next) = effects.delete(key);
        *effects = next;
        taken
    }
}

impl MapOutlet<String, Value> for RecordOutlet {
    fn has(&self, key: &String) -> bool {
        self.members.borrow().has(key)
    }

    fn get_key(&self, key: &String) -> Option<Value> {
        self.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.names()
    }

    fn len(&self) -> usize {
        self.members.borrow().len()
    }

    fn bind_map_output(&self, output: Weak<dyn MapInlet<String>>) {
        self.outputs.bind_keyed(output);
    }

    fn unbind_map_output(&self, output: &Weak<dyn MapInlet<String>>) {
        self.outputs.unbind_keyed(output);
    }

    fn decohere_input_key(&self, key: &String, effect: KeyEffect) {
        if !self.record_effect(key, effect) {
            return;
        }
        trace!(node = "record", key = key.as_str(), ?effect, "decohere key");
        self.coherence.force_stale();
        self.outputs.decohere_key(key, effect);
        self.key_outlets.decohere(key);
    }

    fn recohere_input_key(&self, key: &String, version: Version) {
        if !self.take_effect(key) {
            return;
        }
        trace!(node = "record", key = key.as_str(), version, "recohere key");
        let input = self.member(key).as_ref().and_then(Member::inlet).and_then(|inlet| inlet.input());
        if let Some(input) = input {
            wave::settle(vec![input as Rc<dyn Streamlet>], version);
        }
        self.outputs.recohere_key(key, version);
        self.key_outlets.recohere(key, version);
    }

    fn outlet(&self, key: &String) -> Rc<KeyOutlet<String, Value>> {
        let map: Weak<dyn MapOutlet<String, Value>> = self.this.clone();
        self.key_outlets.get_or_create(map, key)
    }
}

impl Outlet<Value> for RecordOutlet {
    fn get(&self) -> Option<Value> {
        self.this.upgrade().map(Value::Record)
    }
}

impl Streamlet for RecordOutlet {
    fn version(&self) -> Version {
        self.coherence.version()
    }

    fn bind_output(&self, output: Weak<dyn Inlet>) {
        self.outputs.bind(output);
    }

    fn unbind_output(&self, output: &Weak<dyn Inlet>) {
        self.outputs.unbind(output);
    }

    fn unbind_outputs(&self) {
        self.outputs.clear();
    }

    fn disconnect_outputs(&self) {
        self.outputs.disconnect();
        self.key_outlets.disconnect_all();
    }

    fn disconnect_inputs(&self) {
        let members: Vec<Member> = self.members.borrow().values().collect();
        for member in members {
            match member {
                Member::Bound(inlet) => {
                    if let Some(input) = inlet.detach() {
                        wave::schedule(move || input.disconnect_inputs());
                    }
                }
                Member::Nested(inlet) => {
                    if let Some(input) = inlet.input() {
                        wave::schedule(move || input.disconnect_inputs());
                    }
                }
                Member::Value(_) => {}
            }
        }
        wave::run();
        *self.effects.borrow_mut() = Tree::new();
        self.coherence.reset();
    }

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "record", "decohere");
            self.outputs.decohere_all();
            self.key_outlets.decohere_all();
        }
    }

    /// Settles bound inputs and nested records first, then the pending
    /// members, so compound records settle bottom-up within one wave.
    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "record", version, "recohere");
        wave::settle(self.inputs(), version);
        let pending: Vec<String> = self.effects.borrow().keys().collect();
        for key in &pending {
            self.recohere_input_key(key, version);
        }
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
        self.key_outlets.recohere_all(version);
    }

    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        self.members
            .borrow()
            .values()
            .filter_map(|member| member.inlet().and_then(|inlet| inlet.input()))
            .map(|input| input as Rc<dyn Streamlet>)
            .collect()
    }
}

impl fmt::Debug for RecordOutlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.borrow();
        f.debug_map()
            .entries(members.entries().map(|(name, member)| (name, member.value())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::ComputedOutlet;
    use crate::input::ValueInput;

    #[test]
    fn test_record_set_get_remove() {
        let record = RecordOutlet::new();
        assert!(record.set("b", 2).unwrap());
        assert!(record.set("a", "x").unwrap());
        assert!(!record.set("a", "x").unwrap());
        assert_eq!(record.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(record.get("b"), Some(Value::Num(2.0)));

        assert!(record.remove("a"));
        assert!(!record.remove("a"));
        assert_eq!(record.get("a"), None);
    }

    #[test]
    fn test_bound_member_is_read_only() {
        let source = ValueInput::new(Value::from(1));
        let record = RecordOutlet::new();
        record.bind("total", source.clone());
        assert!(record.is_bound("total"));
        assert_eq!(record.get("total"), Some(Value::Num(1.0)));

        let err = record.set("total", 5).unwrap_err();
        assert!(matches!(err, TidalError::UnsupportedOperation(_)));

        source.set(Value::from(9));
        assert_eq!(record.get("total"), Some(Value::Num(9.0)));

        assert!(record.remove("total"));
        assert!(record.set("total", 5).unwrap());
    }

    #[test]
    fn test_member_record_type_check() {
        let record = RecordOutlet::new();
        let child = RecordOutlet::new();
        record.set("child", child.clone()).unwrap();
        record.set("n", 3).unwrap();

        let found = record.member_record("child").unwrap().unwrap();
        assert!(Rc::ptr_eq(&found, &child));
        assert!(record.member_record("missing").unwrap().is_none());
        assert!(matches!(
            record.member_record("n"),
            Err(TidalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_scope_resolution() {
        let root = RecordOutlet::new();
        root.set("unit", "m").unwrap();
        root.set("scale", 2).unwrap();
        let child = RecordOutlet::new();
        root.set("child", child.clone()).unwrap();
        child.set("scale", 10).unwrap();

        assert!(Rc::ptr_eq(&child.scope().unwrap(), &root));
        assert_eq!(child.resolve("unit"), Some(Value::from("m")));
        assert_eq!(child.resolve("scale"), Some(Value::Num(10.0)));
        assert_eq!(child.resolve("missing"), None);

        let outlet = child.resolve_outlet("unit").unwrap();
        assert!(Rc::ptr_eq(&outlet, &root.outlet(&"unit".to_string())));
    }

    #[test]
    fn test_record_cannot_contain_itself() {
        let root = RecordOutlet::new();
        let child = RecordOutlet::with_scope(&root);
        assert!(root.set("me", root.clone()).is_err());
        assert!(child.set("parent", root.clone()).is_err());
        assert!(!root.contains("me"));
    }

    #[test]
    fn test_nested_change_marks_parent_member_stale() {
        let root = RecordOutlet::new();
        let child = RecordOutlet::new();
        root.set("child", child.clone()).unwrap();
        child.set("x", 1).unwrap();
        root.recohere(0);
        assert_eq!(root.version(), 0);
        assert_eq!(child.version(), 0);

        let child_outlet = root.outlet(&"child".to_string());
        child_outlet.recohere(0);
        child.set("x", 2).unwrap();
        assert!(child.is_stale());
        assert!(root.is_stale());
        assert!(child_outlet.is_stale());

        root.recohere(1);
        assert_eq!(child.version(), 1);
        assert_eq!(root.version(), 1);
        assert!(!child_outlet.is_stale());
    }

    #[test]
    fn test_record_feeds_computed() {
        let record = RecordOutlet::new();
        record.set("n", 4).unwrap();
        let n = record.outlet(&"n".to_string());
        let doubled = ComputedOutlet::new(|v: Option<Value>| {
            v.and_then(|v| v.as_num().ok()).map(|n| n * 2.0)
        });
        doubled.bind_input(n);
        doubled.recohere(0);
        assert_eq!(doubled.get(), Some(8.0));

        record.set("n", 5).unwrap();
        assert!(doubled.is_stale());
        doubled.recohere(1);
        assert_eq!(doubled.get(), Some(10.0));
    }
}
