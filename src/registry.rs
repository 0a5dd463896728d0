//! Process-wide block factory registry, keyed by NoC ID.
//!
//! Registration is explicit: call [`register_builtin_blocks`] (or
//! [`register_block`] for custom blocks) during startup, before any
//! [`make_block`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use lazy_static::lazy_static;

use crate::ddc::{self, DdcBlock};
use crate::error::{DdcError, DdcResult};
use crate::invariant_ppt::{assert_invariant, REGISTRY_LIFECYCLE};
use crate::node::{BlockArgs, BlockControl};
use crate::regs::RegisterPort;

/// Builds a block on top of a register port.
pub type BlockFactory = fn(Box<dyn RegisterPort>, BlockArgs) -> DdcResult<Box<dyn BlockControl>>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    factory: BlockFactory,
}

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<u32, Entry>> = Mutex::new(HashMap::new());
}

fn registry() -> MutexGuard<'static, HashMap<u32, Entry>> {
    // Entries are plain data; a panic elsewhere cannot leave one half-written
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Register a factory under `noc_id`.
pub fn register_block(noc_id: u32, name: &'static str, factory: BlockFactory) -> DdcResult<()> {
    let mut reg = registry();
    if let Some(existing) = reg.get(&noc_id) {
        return Err(DdcError::AlreadyRegistered {
            name: existing.name.to_string(),
            scope: format!("NoC ID 0x{:08X}", noc_id),
        });
    }
    tracing::debug!(noc_id = %format!("0x{:08X}", noc_id), name, "registering block");
    reg.insert(noc_id, Entry { name, factory });
    Ok(())
}

fn make_ddc(regs: Box<dyn RegisterPort>, args: BlockArgs) -> DdcResult<Box<dyn BlockControl>> {
    Ok(Box::new(DdcBlock::new(regs, args)?))
}

/// Register the blocks this crate provides. Safe to call more than once.
pub fn register_builtin_blocks() {
    let mut reg = registry();
    reg.entry(ddc::NOC_ID).or_insert(Entry {
        name: ddc::BLOCK_NAME,
        factory: make_ddc,
    });
}

pub fn is_registered(noc_id: u32) -> bool {
    registry().contains_key(&noc_id)
}

/// Name registered for `noc_id`.
pub fn block_name(noc_id: u32) -> Option<&'static str> {
    registry().get(&noc_id).map(|e| e.name)
}

/// Registered NoC IDs and names, ordered by NoC ID.
pub fn registered_blocks() -> Vec<(u32, &'static str)> {
    let mut blocks: Vec<_> = registry().iter().map(|(&id, e)| (id, e.name)).collect();
    blocks.sort_unstable();
    blocks
}

/// Instantiate the block registered for `noc_id`.
pub fn make_block(
    noc_id: u32,
    regs: Box<dyn RegisterPort>,
    args: BlockArgs,
) -> DdcResult<Box<dyn BlockControl>> {
    // Copy the entry out so the lock is not held while the factory runs
    let entry = registry().get(&noc_id).copied();
    let entry = entry.ok_or(DdcError::UnknownBlock(noc_id))?;
    assert_invariant(REGISTRY_LIFECYCLE, true, "factory registered before use", Some(entry.name));
    tracing::debug!(block = entry.name, unique_id = %args.unique_id, "making block");
    (entry.factory)(regs, args)
}
