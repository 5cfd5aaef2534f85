//! Operator registry keyed by component type.
//!
//! The driver and the CLI only know a component type string and the
//! node's attributes; the registry turns those into a boxed `Node`.

use std::collections::BTreeMap;

use rivulet_core::attributes::Attributes;

use crate::denormalize::{self, Denormalizer};
use crate::join::{cross, foreign_key, hash, intersection};
use crate::join::{CheckForeignKey, CrossJoin, DataIntersection, HashJoin};
use crate::sort::{within_groups, SortWithinGroups};
use crate::traits::{Node, OpError, PortSchemas, Result};

pub type NodeFactory = fn(&Attributes, PortSchemas) -> Result<Box<dyn Node>>;

pub struct Registry {
    factories: BTreeMap<&'static str, NodeFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with every built-in operator.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        reg.register(hash::COMPONENT_TYPE, make_hash_join);
        reg.register(intersection::COMPONENT_TYPE, make_intersection);
        reg.register(foreign_key::COMPONENT_TYPE, make_foreign_key);
        reg.register(denormalize::COMPONENT_TYPE, make_denormalizer);
        reg.register(within_groups::COMPONENT_TYPE, make_sort_within_groups);
        reg.register(cross::COMPONENT_TYPE, make_cross_join);
        reg
    }

    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) the factory for `component_type`.
    pub fn register(&mut self, component_type: &'static str, factory: NodeFactory) {
        self.factories.insert(component_type, factory);
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.factories.contains_key(component_type)
    }

    pub fn make(
        &self,
        component_type: &str,
        attrs: &Attributes,
        ports: PortSchemas,
    ) -> Result<Box<dyn Node>> {
        let factory = self.factories.get(component_type).ok_or_else(|| {
            OpError::Config(format!("unknown component type '{component_type}'"))
        })?;
        factory(attrs, ports)
    }

    pub fn component_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

fn make_hash_join(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(HashJoin::from_attributes(attrs, ports)?))
}

fn make_intersection(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(DataIntersection::from_attributes(attrs, ports)?))
}

fn make_foreign_key(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(CheckForeignKey::from_attributes(attrs, ports)?))
}

fn make_denormalizer(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(Denormalizer::from_attributes(attrs, ports)?))
}

fn make_sort_within_groups(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(SortWithinGroups::from_attributes(attrs, ports)?))
}

fn make_cross_join(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(CrossJoin::from_attributes(attrs, ports)?))
}
