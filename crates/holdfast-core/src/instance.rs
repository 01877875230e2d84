//! Instance records.
//!
//! An [`InstanceRecord`] is the object the dynamic runtime sees for a native
//! value. It embeds one [`OwnershipCell`] per native layer of the exposed
//! type: a plain native type has a single layer, a composite type declared on
//! the dynamic side has one layer per native type it is built from.

use bitflags::bitflags;

use crate::error::{BridgeError, Result};
use crate::holder::{CellKind, OwnershipCell};
use crate::TypeHash;

bitflags! {
    /// Derived properties of an instance record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceFlags: u8 {
        /// At least one layer owns its value (exclusive or shared).
        const OWNED = 1 << 0;
        /// Every populated layer only observes memory owned elsewhere.
        const VIEW = 1 << 1;
        /// The record has exactly one layer.
        const SIMPLE_LAYOUT = 1 << 2;
    }
}

/// One native slot of an instance record.
#[derive(Debug)]
pub struct Layer {
    type_hash: TypeHash,
    type_name: &'static str,
    cell: OwnershipCell,
}

impl Layer {
    fn new(type_hash: TypeHash, type_name: &'static str) -> Self {
        Self {
            type_hash,
            type_name,
            cell: OwnershipCell::new(),
        }
    }

    /// Native type stored in this layer.
    pub fn type_hash(&self) -> TypeHash {
        self.type_hash
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn cell(&self) -> &OwnershipCell {
        &self.cell
    }

    pub fn cell_mut(&mut self) -> &mut OwnershipCell {
        &mut self.cell
    }
}

/// The dynamic-side proxy for one or more native objects.
#[derive(Debug)]
pub struct InstanceRecord {
    type_hash: TypeHash,
    type_name: &'static str,
    layers: Vec<Layer>,
}

impl InstanceRecord {
    /// Create a record with one empty cell per layer.
    pub fn new(
        type_hash: TypeHash,
        type_name: &'static str,
        layers: impl IntoIterator<Item = (TypeHash, &'static str)>,
    ) -> Self {
        Self {
            type_hash,
            type_name,
            layers: layers
                .into_iter()
                .map(|(hash, name)| Layer::new(hash, name))
                .collect(),
        }
    }

    /// Create a single-layer record for a native type exposed as `type_hash`.
    ///
    /// The exposed type may differ from the stored layer type when a
    /// polymorphic hook reveals a more-derived runtime type.
    pub fn single(
        type_hash: TypeHash,
        type_name: &'static str,
        layer: (TypeHash, &'static str),
    ) -> Self {
        Self::new(type_hash, type_name, [layer])
    }

    /// Exposed type of the record.
    pub fn type_hash(&self) -> TypeHash {
        self.type_hash
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Position of the layer storing `type_hash`.
    pub fn layer_index(&self, type_hash: TypeHash) -> Option<usize> {
        self.layers.iter().position(|layer| layer.type_hash == type_hash)
    }

    /// Number of layers currently holding a value.
    pub fn populated_count(&self) -> usize {
        self.layers.iter().filter(|layer| layer.cell.is_populated()).count()
    }

    /// True when every layer holds a value.
    pub fn is_fully_populated(&self) -> bool {
        self.layers.iter().all(|layer| layer.cell.is_populated())
    }

    /// Fill one empty layer.
    ///
    /// `store` receives the layer's cell and must populate it; a populated
    /// layer is refused before `store` runs.
    pub fn populate<F>(&mut self, index: usize, store: F) -> Result<()>
    where
        F: FnOnce(&mut OwnershipCell) -> Result<()>,
    {
        let type_name = self.type_name;
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(BridgeError::NoSuchLayer { type_name, index })?;
        if layer.cell.is_populated() {
            return Err(BridgeError::InvalidTransition {
                type_name: layer.type_name,
                held: layer.cell.kind(),
            });
        }
        store(&mut layer.cell)
    }

    /// Ownership properties derived from the current layer states.
    pub fn flags(&self) -> InstanceFlags {
        let mut flags = InstanceFlags::empty();
        if self.layers.len() == 1 {
            flags |= InstanceFlags::SIMPLE_LAYOUT;
        }
        let mut populated = false;
        let mut owned = false;
        for layer in &self.layers {
            match layer.cell.kind() {
                CellKind::Empty => {}
                CellKind::Unowned => populated = true,
                CellKind::Exclusive | CellKind::Shared => {
                    populated = true;
                    owned = true;
                }
            }
        }
        if owned {
            flags |= InstanceFlags::OWNED;
        } else if populated {
            flags |= InstanceFlags::VIEW;
        }
        flags
    }
}

impl Drop for InstanceRecord {
    fn drop(&mut self) {
        for layer in self.layers.iter_mut().rev() {
            layer.cell.release();
        }
    }
}
