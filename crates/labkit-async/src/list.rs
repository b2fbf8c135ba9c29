//! Combinators over child futures.
//!
//! All three hold a live, ordered collection of children and finish once it
//! is empty:
//! - [`FutureList`] and [`AnyOrder`] poll every child on each tick.
//! - [`InOrder`] polls only the head; the next child starts being polled on
//!   the tick after the head finishes.
//!
//! Each poll works from a snapshot of the children taken before any child
//! runs. Children added by callbacks during the tick are polled from the next
//! tick on. After the snapshot is processed the live collection is filtered
//! down to the children that are still pending, so a finished child is never
//! polled again.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::deferred::{Deferred, Trigger};
use crate::error::{FutureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequencing {
    All,
    HeadOnly,
}

type Children = Rc<RefCell<Vec<Deferred>>>;

struct ChildSet {
    children: Children,
    sequencing: Sequencing,
}

impl ChildSet {
    fn snapshot(&self) -> Vec<Deferred> {
        match self.sequencing {
            Sequencing::All => self.children.borrow().clone(),
            Sequencing::HeadOnly => self.children.borrow().first().cloned().into_iter().collect(),
        }
    }

    fn prune(&self) {
        self.children.borrow_mut().retain(|child| !child.is_done());
    }
}

impl Trigger for ChildSet {
    fn test(&self, _now: Instant) -> Result<bool> {
        let mut outcome = Ok(());
        for child in self.snapshot() {
            if let Err(err) = child.poll() {
                outcome = Err(err);
                break;
            }
        }
        self.prune();
        outcome?;
        Ok(self.children.borrow().is_empty())
    }

    fn is_complete(&self) -> bool {
        self.children.borrow().is_empty()
    }

    fn add_time(&self, delta: Duration) {
        let children = self.children.borrow().clone();
        for child in children {
            child.add_time(delta);
        }
    }

    fn what_for(&self) -> String {
        let children = self.children.borrow().clone();
        if children.is_empty() {
            return "nothing".to_string();
        }
        let conjunction = match self.sequencing {
            Sequencing::All => " and ",
            Sequencing::HeadOnly => " then ",
        };
        children
            .iter()
            .map(Deferred::what_for)
            .collect::<Vec<_>>()
            .join(conjunction)
    }
}

/// Shared implementation behind the three combinator handles.
///
/// Completion is only latched by [`Deferred::poll`]: a group with no
/// children reports `is_done() == false` until it has been polled once.
/// Poll it (or [`Deferred::wait`] on it) rather than spinning on `is_done`.
#[derive(Clone, Debug)]
pub struct Group {
    future: Deferred,
    children: Children,
}

impl Group {
    fn new(sequencing: Sequencing) -> Self {
        let children: Children = Rc::new(RefCell::new(Vec::new()));
        let future = Deferred::new(ChildSet {
            children: Rc::clone(&children),
            sequencing,
        });
        Self { future, children }
    }

    /// Append a child. Legal at any time, including from a callback running
    /// inside this group's poll, until the group has finished.
    pub fn add(&self, child: impl Into<Deferred>) -> Result<()> {
        if self.future.is_done() {
            return Err(FutureError::Finished {
                what_for: self.future.what_for(),
            });
        }
        self.children.borrow_mut().push(child.into());
        Ok(())
    }

    /// Append several children.
    pub fn extend<I, F>(&self, children: I) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: Into<Deferred>,
    {
        for child in children {
            self.add(child)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.borrow().is_empty()
    }
}

impl Deref for Group {
    type Target = Deferred;

    fn deref(&self) -> &Deferred {
        &self.future
    }
}

macro_rules! combinator {
    ($(#[$doc:meta])* $name:ident, $sequencing:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug)]
        pub struct $name(Group);

        impl $name {
            pub fn new() -> Self {
                Self(Group::new($sequencing))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Deref for $name {
            type Target = Group;

            fn deref(&self) -> &Group {
                &self.0
            }
        }

        impl From<$name> for Deferred {
            fn from(list: $name) -> Self {
                list.0.future
            }
        }
    };
}

combinator!(
    /// Polls every child each tick; done when all children are done.
    FutureList,
    Sequencing::All
);

combinator!(
    /// Same polling as [`FutureList`]: children may finish in any order.
    AnyOrder,
    Sequencing::All
);

combinator!(
    /// Polls only the first child until it is done, then the next.
    InOrder,
    Sequencing::HeadOnly
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::timer::{Deadline, Timer};
    use std::cell::Cell;

    fn after(secs: u64, label: &str) -> Deferred {
        Deadline::after(Duration::from_secs(secs)).label(label).start()
    }

    #[test]
    fn empty_list_waits_for_nothing_and_finishes_on_first_poll() {
        let list = FutureList::new();
        assert_eq!(list.what_for(), "nothing");
        assert!(!list.is_done());
        list.poll().unwrap();
        assert!(list.is_done());
    }

    #[test]
    fn prunes_finished_children_and_keeps_order() {
        let list = FutureList::new();
        list.extend([after(1, "a"), after(5, "b"), after(1, "c"), after(9, "d")])
            .unwrap();
        assert_eq!(list.what_for(), "a and b and c and d");

        list.add_time(Duration::from_secs(2));
        list.poll().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.what_for(), "b and d");
        assert!(!list.is_done());

        list.add_time(Duration::from_secs(10));
        list.poll().unwrap();
        assert!(list.is_done());
    }

    #[test]
    fn cancelled_child_is_dropped_without_being_polled() {
        let fired = Rc::new(Cell::new(false));
        let seen = Rc::clone(&fired);
        let child = after(0, "quick").on_done(move || {
            seen.set(true);
            Ok(())
        });
        let list = AnyOrder::new();
        list.add(child.clone()).unwrap();
        child.cancel();
        list.poll().unwrap();
        assert!(list.is_done());
        assert!(!fired.get());
    }

    #[test]
    fn children_added_during_poll_wait_for_next_tick() {
        let list = FutureList::new();
        let polled_late = Rc::new(Cell::new(0));

        let handle = list.clone();
        let counter = Rc::clone(&polled_late);
        let spawner = after(0, "spawner").on_done(move || {
            let counter = Rc::clone(&counter);
            handle.add(
                Timer::new(Duration::ZERO, move || {
                    counter.set(counter.get() + 1);
                    Ok(())
                })
                .first_delay(Duration::ZERO)
                .start(),
            )?;
            Ok(())
        });
        list.add(spawner).unwrap();

        list.poll().unwrap();
        assert_eq!(polled_late.get(), 0, "new child not polled in the same tick");
        assert_eq!(list.len(), 1);

        list.poll().unwrap();
        assert_eq!(polled_late.get(), 1);
        assert!(!list.is_done());
    }

    #[test]
    fn add_after_finish_is_rejected() {
        let list = FutureList::new();
        list.poll().unwrap();
        let err = list.add(after(1, "late")).unwrap_err();
        assert!(matches!(err, FutureError::Finished { .. }));
    }

    #[test]
    fn in_order_only_polls_the_head() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let list = InOrder::new();
        for name in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            list.add(after(0, name).on_done(move || {
                order.borrow_mut().push(name);
                Ok(())
            }))
            .unwrap();
        }
        assert_eq!(list.what_for(), "first then second then third");

        list.poll().unwrap();
        assert_eq!(*order.borrow(), ["first"]);
        assert_eq!(list.len(), 2);
        list.poll().unwrap();
        assert!(!list.is_done());
        list.poll().unwrap();
        assert_eq!(*order.borrow(), ["first", "second", "third"]);
        assert!(list.is_done(), "done on the poll that drains the sequence");
    }

    #[test]
    fn in_order_waits_on_a_slow_head() {
        let list = InOrder::new();
        list.add(after(10, "slow")).unwrap();
        list.add(after(0, "fast")).unwrap();
        list.poll().unwrap();
        assert_eq!(list.len(), 2, "fast child is not polled behind the head");
        list.add_time(Duration::from_secs(10));
        list.poll().unwrap();
        list.poll().unwrap();
        assert!(list.is_done());
    }

    #[test]
    fn add_time_reaches_nested_children() {
        let outer = FutureList::new();
        let inner = AnyOrder::new();
        inner.add(after(30, "nested")).unwrap();
        outer.add(inner.clone()).unwrap();

        outer.add_time(Duration::from_secs(31));
        outer.poll().unwrap();
        assert!(inner.is_done());
        assert!(outer.is_done());
    }
}
