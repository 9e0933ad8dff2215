//! The object registry and command/query bus.
//!
//! The registry maps stable object ids to peripherals, indexes them by
//! class and by claimed pin, and dispatches bus commands. It is populated
//! once at startup from the declarative configuration; no classes appear
//! after init.

use crate::board::Board;
use crate::object::{CmdResult, ObjectClass, ObjectId, Options, SimObject, Status};
use crate::CoreError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Immutable registry of all simulated peripherals.
pub struct Registry {
    board: Board,
    objects: HashMap<ObjectId, Arc<dyn SimObject>>,
    by_class: BTreeMap<ObjectClass, Vec<ObjectId>>,
    by_name: HashMap<(ObjectClass, String), ObjectId>,
    pin_owner: HashMap<String, ObjectId>,
}

impl Registry {
    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn object(&self, id: ObjectId) -> Result<&Arc<dyn SimObject>, CoreError> {
        self.objects.get(&id).ok_or(CoreError::NotFound(id))
    }

    pub fn lookup(&self, class: ObjectClass, name: &str) -> Result<ObjectId, CoreError> {
        self.by_name
            .get(&(class, name.to_string()))
            .copied()
            .ok_or_else(|| CoreError::UnknownObject(class.as_str().to_string(), name.to_string()))
    }

    pub fn objects_of(&self, class: ObjectClass) -> &[ObjectId] {
        self.by_class
            .get(&class)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn count(&self, class: ObjectClass) -> usize {
        self.objects_of(class).len()
    }

    /// Resolves the owner of a physical pin, optionally restricted to the
    /// given classes (an empty list means any class).
    pub fn find_object_from_pin(
        &self,
        pin: &str,
        classes: &[ObjectClass],
    ) -> Option<(ObjectId, ObjectClass)> {
        let id = *self.pin_owner.get(pin)?;
        let class = self.objects.get(&id)?.class();
        if classes.is_empty() || classes.contains(&class) {
            Some((id, class))
        } else {
            None
        }
    }

    /// Collects frozen status snapshots for the given objects. Unknown ids
    /// are omitted from the result.
    pub fn query(&self, ids: &[ObjectId]) -> HashMap<ObjectId, Status> {
        ids.iter()
            .filter_map(|id| Some((*id, self.objects.get(id)?.status())))
            .collect()
    }

    /// Executes a command on an object, resolving the subcommand by id.
    pub fn exec(
        &self,
        object_id: ObjectId,
        cmd_id: u32,
        opts: &Options,
    ) -> Result<CmdResult, CoreError> {
        let object = self.object(object_id)?;
        let spec = object
            .commands()
            .iter()
            .find(|spec| spec.id == cmd_id)
            .ok_or_else(|| {
                CoreError::InvalidArg(format!(
                    "object {} has no command {cmd_id}",
                    object.name()
                ))
            })?;
        debug!(object = object.name(), command = spec.name, "bus exec");
        object.exec(spec, opts)
    }

    /// Resolves a `(class, object name, command name)` triple from the text
    /// channel into ids.
    pub fn resolve_command(
        &self,
        class: &str,
        object_name: &str,
        cmd_name: &str,
    ) -> Result<(ObjectId, u32), CoreError> {
        let class = ObjectClass::parse(class)
            .ok_or_else(|| CoreError::InvalidArg(format!("unknown class '{class}'")))?;
        let id = self.lookup(class, object_name)?;
        let object = self.object(id)?;
        let spec = object
            .commands()
            .iter()
            .find(|spec| spec.name == cmd_name)
            .ok_or_else(|| {
                CoreError::InvalidArg(format!(
                    "object {object_name} has no command '{cmd_name}'"
                ))
            })?;
        Ok((id, spec.id))
    }

    /// Resets every object to its power-on state.
    pub fn reset_all(&self) {
        for object in self.objects.values() {
            object.reset();
        }
    }
}

/// Startup-time registry construction with pin and limit enforcement.
pub struct RegistryBuilder {
    registry: Registry,
    next_id: ObjectId,
    remaining: HashMap<ObjectClass, u32>,
}

impl RegistryBuilder {
    pub fn new(board: Board) -> Self {
        let remaining = ObjectClass::ALL
            .iter()
            .filter_map(|class| Some((*class, board.limit(*class)?)))
            .collect();
        RegistryBuilder {
            registry: Registry {
                board,
                objects: HashMap::new(),
                by_class: BTreeMap::new(),
                by_name: HashMap::new(),
                pin_owner: HashMap::new(),
            },
            next_id: 1,
            remaining,
        }
    }

    pub fn board(&self) -> &Board {
        &self.registry.board
    }

    /// Reserves the next object id. The factory that creates the object
    /// receives this id before registration.
    pub fn next_id(&self) -> ObjectId {
        self.next_id
    }

    /// Registers a constructed object, enforcing class+name uniqueness,
    /// per-class board limits, and exclusive pin ownership. All checks run
    /// before any state mutates, so a rejected object leaves the builder
    /// untouched.
    pub fn register(&mut self, object: Arc<dyn SimObject>) -> Result<ObjectId, CoreError> {
        let class = object.class();
        let name = object.name().to_string();
        let id = object.id();
        if id != self.next_id {
            return Err(CoreError::Config(format!(
                "object '{name}' registered with stale id {id}"
            )));
        }
        if self
            .registry
            .by_name
            .contains_key(&(class, name.clone()))
        {
            return Err(CoreError::Duplicate(format!("{class}:{name}")));
        }
        if self.remaining.get(&class) == Some(&0) {
            return Err(CoreError::ClassLimit(class.as_str()));
        }
        let pins = object.pins();
        for (_, pin) in &pins {
            self.registry.board.parse_pin(pin)?;
            if let Some(owner) = self.registry.pin_owner.get(pin) {
                return Err(CoreError::PinClaimed(pin.clone(), *owner));
            }
        }

        if let Some(remaining) = self.remaining.get_mut(&class) {
            *remaining -= 1;
        }
        for (_, pin) in pins {
            self.registry.pin_owner.insert(pin, id);
        }
        debug!(%class, name, id, "object registered");
        self.registry.objects.insert(id, object);
        self.registry.by_class.entry(class).or_default().push(id);
        self.registry.by_name.insert((class, name), id);
        self.next_id += 1;
        Ok(id)
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::digital_pin::DigitalPinObject;

    fn builder() -> RegistryBuilder {
        RegistryBuilder::new(Board::generic(1_000_000))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = builder();
        let id = builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PC7",
                false,
            )))
            .unwrap();
        let registry = builder.build();
        assert_eq!(registry.lookup(ObjectClass::DigitalPin, "led").unwrap(), id);
        assert_eq!(
            registry.find_object_from_pin("PC7", &[]),
            Some((id, ObjectClass::DigitalPin))
        );
        assert!(registry.lookup(ObjectClass::DigitalPin, "nope").is_err());
    }

    #[test]
    fn test_pin_uniqueness_enforced() {
        let mut builder = builder();
        builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PC7",
                false,
            )))
            .unwrap();
        let err = builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led2",
                "PC7",
                false,
            )))
            .unwrap_err();
        assert!(matches!(err, CoreError::PinClaimed(_, _)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut builder = builder();
        builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PC7",
                false,
            )))
            .unwrap();
        let err = builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PC8",
                false,
            )))
            .unwrap_err();
        assert!(matches!(err, CoreError::Duplicate(_)));
    }

    #[test]
    fn test_unknown_pin_rejected() {
        let mut builder = builder();
        let err = builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PQ1",
                false,
            )))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownPin(_)));
    }

    #[test]
    fn test_query_returns_snapshots() {
        let mut builder = builder();
        let id = builder
            .register(Arc::new(DigitalPinObject::new(
                builder.next_id(),
                "led",
                "PC7",
                true,
            )))
            .unwrap();
        let registry = builder.build();
        let status = registry.query(&[id, 999]);
        assert_eq!(status.len(), 1);
        assert_eq!(status[&id]["state"].as_bool(), Some(true));
    }
}
