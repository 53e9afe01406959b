// src/engine/cursor.rs

//! Position descriptor for one pipeline step.
//!
//! A `Cursor` is a value: every advance returns a new one, and a cursor that
//! has been handed to an observer is never changed afterwards.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::collection::{FlatItem, find_position};
use crate::exec::NextRequest;

/// Opaque identity shared by every cursor of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorRef(u64);

impl CursorRef {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CursorRef(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CursorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    iteration: usize,
    position: usize,
    length: usize,
    cycles: usize,
    run_ref: CursorRef,
    eof: bool,
    bof: bool,
    empty: bool,
    cr: bool,
}

/// Where traversal goes after an item completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Next step within the current iteration.
    Step(Cursor),
    /// The current iteration is over.
    EndIteration,
    /// A jump target could not be found; the iteration is over.
    UnknownTarget(String),
}

impl Cursor {
    /// Cursor at the first step of a run over `length` items, `cycles` times.
    pub fn new(length: usize, cycles: usize) -> Self {
        Self {
            iteration: 0,
            position: 0,
            length,
            cycles,
            run_ref: CursorRef::fresh(),
            eof: length == 0 || cycles == 0,
            bof: true,
            empty: length == 0,
            cr: false,
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn run_ref(&self) -> CursorRef {
        self.run_ref
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_bof(&self) -> bool {
        self.bof
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Whether this step was reached through a redirect (`setNextRequest`).
    pub fn is_cr(&self) -> bool {
        self.cr
    }

    pub fn is_last_iteration(&self) -> bool {
        self.iteration + 1 == self.cycles
    }

    pub fn is_last_item(&self) -> bool {
        self.position + 1 == self.length
    }

    /// Natural advance: next position, rolling into the next iteration.
    pub fn next(&self) -> Cursor {
        if self.eof {
            return self.clone();
        }
        let (iteration, position) = if self.position + 1 >= self.length {
            (self.iteration + 1, 0)
        } else {
            (self.iteration, self.position + 1)
        };
        self.moved(iteration, position, false)
    }

    /// Redirect to `position` within the current iteration.
    pub fn jump(&self, position: usize) -> Option<Cursor> {
        if self.eof || position >= self.length {
            return None;
        }
        Some(self.moved(self.iteration, position, true))
    }

    /// First step of the next iteration.
    pub fn end_iteration(&self) -> Cursor {
        if self.eof {
            return self.clone();
        }
        self.moved(self.iteration + 1, 0, false)
    }

    /// First step of `iteration`, sharing this cursor's run identity.
    pub fn for_iteration(&self, iteration: usize) -> Cursor {
        self.moved(iteration, 0, false)
    }

    /// Decide the step after this one, given the redirect (if any) the item
    /// requested.
    pub fn advance(&self, items: &[FlatItem], next_request: Option<&NextRequest>) -> Advance {
        match next_request {
            None => {
                let next = self.next();
                if next.eof || next.iteration != self.iteration {
                    Advance::EndIteration
                } else {
                    Advance::Step(next)
                }
            }
            Some(NextRequest::Stop) => Advance::EndIteration,
            Some(NextRequest::Item(target)) => match find_position(items, target)
                .and_then(|position| self.jump(position))
            {
                Some(next) => Advance::Step(next),
                None => Advance::UnknownTarget(target.clone()),
            },
        }
    }

    fn moved(&self, iteration: usize, position: usize, cr: bool) -> Cursor {
        let eof = self.empty || iteration >= self.cycles;
        Cursor {
            iteration,
            position: if eof { 0 } else { position },
            length: self.length,
            cycles: self.cycles,
            run_ref: self.run_ref,
            eof,
            bof: iteration == 0 && position == 0 && !cr,
            empty: self.empty,
            cr,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} @ {}/{}",
            self.run_ref, self.iteration, self.cycles, self.position, self.length
        )
    }
}
