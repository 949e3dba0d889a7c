//! Pin table: token → owning request object
//!
//! A pinned request's payload slot holds a [`PinToken`]. The table maps
//! each token back to the `Rc` that keeps the owner alive while the engine
//! holds its address, plus the address itself so a completion can be
//! validated before anything is read through it.
//!
//! The table is per thread. Requests are created, completed and disposed
//! on the loop thread; a lookup from any other thread finds nothing.
//!
//! Tokens are never reused, so a stale token never resolves to a newer
//! request that happens to occupy the same address.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use uvreq_core::PinToken;

struct Entry {
    addr: usize,
    target: Rc<dyn Any>,
    type_name: &'static str,
}

#[derive(Default)]
struct HandleTable {
    next: u64,
    entries: HashMap<PinToken, Entry>,
    by_addr: HashMap<usize, PinToken>,
}

thread_local! {
    static TABLE: RefCell<HandleTable> = RefCell::new(HandleTable::default());
}

/// One live pin, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRecord {
    pub token: PinToken,
    pub addr: usize,
    pub type_name: &'static str,
}

/// Pin `target` under a fresh token, indexed by its request address.
///
/// Panics if the address is already pinned: two live requests cannot share
/// a block.
pub(crate) fn register(addr: usize, target: Rc<dyn Any>, type_name: &'static str) -> PinToken {
    TABLE.with(|table| {
        let mut table = table.borrow_mut();
        table.next += 1;
        let token = PinToken::new(table.next);
        if let Some(prev) = table.by_addr.insert(addr, token) {
            panic!("address {:#x} pinned twice ({} and {})", addr, prev, token);
        }
        table.entries.insert(
            token,
            Entry {
                addr,
                target,
                type_name,
            },
        );
        token
    })
}

/// Token pinned at a request address, if any
pub fn token_at(addr: usize) -> Option<PinToken> {
    TABLE
        .try_with(|table| table.borrow().by_addr.get(&addr).copied())
        .ok()
        .flatten()
}

/// Resolve a token to its address, owner and owner type name
pub(crate) fn resolve(token: PinToken) -> Option<(usize, Rc<dyn Any>, &'static str)> {
    TABLE
        .try_with(|table| {
            table
                .borrow()
                .entries
                .get(&token)
                .map(|e| (e.addr, Rc::clone(&e.target), e.type_name))
        })
        .ok()
        .flatten()
}

/// Unpin a token. The owner reference is handed back so the caller decides
/// when it drops, outside the table borrow.
///
/// Returns `None` for an unknown token, or once the thread's table has
/// been torn down.
pub(crate) fn release(token: PinToken) -> Option<Rc<dyn Any>> {
    TABLE
        .try_with(|table| {
            let mut table = table.borrow_mut();
            let entry = table.entries.remove(&token)?;
            table.by_addr.remove(&entry.addr);
            Some(entry.target)
        })
        .ok()
        .flatten()
}

/// Pins held by this thread
pub fn live_count() -> usize {
    TABLE
        .try_with(|table| table.borrow().entries.len())
        .unwrap_or(0)
}

/// Every live pin on this thread, ordered by token
pub fn audit() -> Vec<PinRecord> {
    let mut records = TABLE
        .try_with(|table| {
            table
                .borrow()
                .entries
                .iter()
                .map(|(token, e)| PinRecord {
                    token: *token,
                    addr: e.addr,
                    type_name: e.type_name,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    records.sort_by_key(|r| r.token.as_u64());
    records
}
