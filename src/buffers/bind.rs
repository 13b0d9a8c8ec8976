use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use odbc_sys::CDataType;

use crate::handles::StatementHandle;

/// Identity of a column buffer within binding registries. Unique per buffer for the lifetime of
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a buffer is bound as the receiver of a result column or as the value of a parameter
/// marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Column,
    Parameter,
}

struct BindingEntry {
    stmt: Weak<StatementHandle>,
    stmt_id: usize,
    number: u16,
    kind: BindingKind,
    c_type: CDataType,
}

/// The binding registry of one column buffer. Owned by the buffer via `Rc`, referenced weakly by
/// every statement the buffer is bound to.
///
/// Buffer and statement notify each other through this registry when either of them goes away:
/// dropping the buffer unbinds it from every still live statement, freeing a statement removes
/// its entries from the registries of all buffers still bound to it. Either way each (statement,
/// buffer) pair is severed exactly once.
pub(crate) struct SharedBindings {
    id: BufferId,
    entries: RefCell<Vec<BindingEntry>>,
}

impl SharedBindings {
    pub fn new() -> Rc<Self> {
        Rc::new(SharedBindings {
            id: BufferId::next(),
            entries: RefCell::new(Vec::new()),
        })
    }

    /// Record that the owning buffer is now bound to `stmt` and let the statement track the
    /// registry in return. A previous binding with the same coordinates is replaced.
    pub fn register(
        self: &Rc<Self>,
        stmt: &Rc<StatementHandle>,
        number: u16,
        kind: BindingKind,
        c_type: CDataType,
    ) {
        let stmt_id = stmt.stmt_id();
        let mut entries = self.entries.borrow_mut();
        let already_tracked = entries
            .iter()
            .any(|e| e.stmt_id == stmt_id && e.number == number && e.kind == kind);
        entries.retain(|e| !(e.stmt_id == stmt_id && e.number == number && e.kind == kind));
        entries.push(BindingEntry {
            stmt: Rc::downgrade(stmt),
            stmt_id,
            number,
            kind,
            c_type,
        });
        if !already_tracked {
            stmt.track_binding(self.id, number, kind, Rc::downgrade(self));
        }
    }

    /// Remove all entries referring to the statement with the given identity. Called by a
    /// statement which is being freed.
    pub fn forget_statement(&self, stmt_id: usize) {
        self.entries.borrow_mut().retain(|e| e.stmt_id != stmt_id);
    }

    /// Remove a single entry. Called by a statement releasing bindings of one kind (e.g.
    /// `SQLFreeStmt` with `SQL_RESET_PARAMS`).
    pub fn forget_binding(&self, stmt_id: usize, number: u16, kind: BindingKind) {
        self.entries
            .borrow_mut()
            .retain(|e| !(e.stmt_id == stmt_id && e.number == number && e.kind == kind));
    }

    /// `true` if the owning buffer is currently bound to at least one statement.
    pub fn is_bound(&self) -> bool {
        !self.entries.borrow().is_empty()
    }
}

impl Drop for SharedBindings {
    fn drop(&mut self) {
        // The owning buffer is going away. Unbind it from every statement which is still alive,
        // so the driver does not keep pointers into freed memory.
        for entry in self.entries.get_mut().drain(..) {
            if let Some(stmt) = entry.stmt.upgrade() {
                stmt.release_binding(self.id, entry.number, entry.kind, entry.c_type);
            }
        }
    }
}
