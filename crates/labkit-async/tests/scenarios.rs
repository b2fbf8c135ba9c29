#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end scenarios for the polling core.
//!
//! Drives combinators holding timers and task-backed futures the way a
//! caller's loop would, using virtual time instead of sleeping.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use labkit_async::{
    AfterTask, AnyOrder, AsyncSub, AsyncTask, Deferred, FutureError, FutureList, TaskError,
    Timer,
};

/// A task whose outcome is known up front and that reports completion as
/// soon as it is started.
struct Finished {
    name: &'static str,
    started: bool,
    outcome: Result<u32, TaskError>,
}

impl Finished {
    fn ok(name: &'static str, value: u32) -> Self {
        Self {
            name,
            started: false,
            outcome: Ok(value),
        }
    }

    fn failed(name: &'static str, message: &str) -> Self {
        Self {
            name,
            started: false,
            outcome: Err(TaskError::Failed {
                name: name.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

impl AsyncTask for Finished {
    type Output = u32;

    fn name(&self) -> &str {
        self.name
    }

    fn start(&mut self) -> Result<(), TaskError> {
        self.started = true;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn is_complete(&mut self) -> bool {
        self.started
    }

    fn result(&mut self) -> Result<u32, TaskError> {
        self.outcome.clone()
    }
}

fn counting_timer(secs: u64, count: &Rc<Cell<u32>>) -> Deferred {
    let count = Rc::clone(count);
    Timer::new(Duration::from_secs(secs), move || {
        count.set(count.get() + 1);
        Ok(())
    })
    .start()
}

#[test]
fn timers_in_a_list_fire_once_per_elapsed_interval() {
    let counts: Vec<Rc<Cell<u32>>> = (0..3).map(|_| Rc::new(Cell::new(0))).collect();
    let list = FutureList::new();
    for (secs, count) in [10, 20, 30].into_iter().zip(&counts) {
        list.add(counting_timer(secs, count)).unwrap();
    }

    // 35 virtual seconds in 5 second steps.
    for _ in 0..7 {
        list.add_time(Duration::from_secs(5));
        list.poll().unwrap();
    }

    let fired: Vec<u32> = counts.iter().map(|c| c.get()).collect();
    assert_eq!(fired, [3, 1, 1]);
    assert!(!list.is_done(), "timers never complete on their own");
    assert_eq!(list.len(), 3);
}

#[test]
fn after_task_records_value_from_worker_thread() {
    let recorded = Rc::new(Cell::new(0));
    let sink = Rc::clone(&recorded);
    let mut task = AsyncSub::new("answer", || Ok(42_u32));
    task.start().unwrap();

    // Block until the worker is done so a single poll must complete it.
    while !task.is_complete() {
        std::thread::sleep(Duration::from_millis(1));
    }

    let future = AfterTask::new(task)
        .on_success(move |value| {
            sink.set(value);
            Ok(())
        })
        .start()
        .unwrap();
    future.poll().unwrap();
    assert!(future.is_done());
    assert_eq!(recorded.get(), 42);
}

#[test]
fn any_order_drains_when_failure_is_handled() {
    let failures = Rc::new(RefCell::new(Vec::new()));
    let successes = Rc::new(RefCell::new(Vec::new()));

    let errors = Rc::clone(&failures);
    let failing = AfterTask::new(Finished::failed("lvcreate", "insufficient free extents"))
        .on_error(move |e| {
            errors.borrow_mut().push(e.to_string());
            Ok(())
        })
        .start()
        .unwrap();

    let values = Rc::clone(&successes);
    let passing = AfterTask::new(Finished::ok("lsblk", 7))
        .on_success(move |v| {
            values.borrow_mut().push(v);
            Ok(())
        })
        .start()
        .unwrap();

    let outer = FutureList::new();
    let group = AnyOrder::new();
    group.extend([failing, passing]).unwrap();
    outer.add(group.clone()).unwrap();

    outer.poll().unwrap();
    assert!(group.is_done());
    assert!(outer.is_done());
    assert_eq!(*successes.borrow(), [7]);
    assert_eq!(failures.borrow().len(), 1);
    assert!(failures.borrow()[0].contains("insufficient free extents"));
}

/// An unhandled failure escalates out of the poll tick that found it.
/// Children after the failing one in the snapshot wait for the next tick;
/// the failed child is already done and is pruned.
#[test]
fn unhandled_failure_interrupts_the_tick_then_the_group_drains() {
    let successes = Rc::new(Cell::new(0));
    let values = Rc::clone(&successes);

    let failing = AfterTask::new(Finished::failed("vgscan", "no volume groups found"))
        .start()
        .unwrap();
    let passing = AfterTask::new(Finished::ok("dmsetup", 1))
        .on_success(move |_| {
            values.set(values.get() + 1);
            Ok(())
        })
        .start()
        .unwrap();

    let group = AnyOrder::new();
    group.extend([failing.clone(), passing.clone()]).unwrap();

    let err = group.poll().unwrap_err();
    match &err {
        FutureError::TaskFailed { what_for, source } => {
            assert_eq!(what_for, "vgscan");
            assert!(source.to_string().contains("no volume groups found"));
        }
        other => unreachable!("unexpected error {other:?}"),
    }
    assert!(failing.is_done());
    assert!(!passing.is_done(), "rest of the tick was skipped");
    assert_eq!(successes.get(), 0);
    assert_eq!(group.len(), 1);
    assert!(!group.is_done());

    group.poll().unwrap();
    assert_eq!(successes.get(), 1);
    assert!(group.is_done());
}

#[test]
fn cancelling_a_group_member_skips_its_callback() {
    let called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&called);
    let member = AfterTask::new(Finished::ok("rsync", 0))
        .on_success(move |_| {
            flag.set(true);
            Ok(())
        })
        .start()
        .unwrap();

    let list = FutureList::new();
    list.add(member.clone()).unwrap();
    member.cancel();
    list.poll().unwrap();

    assert!(list.is_done());
    assert!(!called.get());
}

#[test]
fn progress_timer_can_describe_its_own_list_mid_poll() {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let list = FutureList::new();
    list.add(
        AfterTask::new(AsyncSub::new("slow probe", || {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }))
        .start()
        .unwrap(),
    )
    .unwrap();

    let observed = list.clone();
    let sink = Rc::clone(&reports);
    let progress = Timer::new(Duration::from_secs(30), move || {
        sink.borrow_mut().push(observed.what_for());
        Ok(())
    })
    .label("progress report")
    .start();
    list.add(progress.clone()).unwrap();

    list.add_time(Duration::from_secs(30));
    list.poll().unwrap();
    assert_eq!(reports.borrow().len(), 1);
    assert!(reports.borrow()[0].contains("progress report"));

    progress.cancel();
    list.wait(Duration::from_millis(5)).unwrap();
    assert!(list.is_done());
}

#[test]
fn list_emptied_by_an_unhandled_failure_still_runs_on_done() {
    let completed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&completed);
    let list = FutureList::new();
    list.add(
        AfterTask::new(Finished::failed("pvcreate", "device busy"))
            .start()
            .unwrap(),
    )
    .unwrap();
    let future = Deferred::from(list.clone()).on_done(move || {
        flag.set(true);
        Ok(())
    });

    assert!(matches!(
        future.poll(),
        Err(FutureError::TaskFailed { .. })
    ));
    assert!(list.is_done());
    assert!(completed.get());
}

#[cfg(unix)]
#[test]
fn polling_a_command_never_blocks_on_a_backgrounded_grandchild() {
    use labkit_async::CommandTask;
    use labkit_core::{CommandString, Host, LocalRunner};
    use std::time::Instant;

    let output = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&output);
    let task = CommandTask::new(
        &LocalRunner,
        &Host::Local,
        &CommandString::shell("sleep 1 & echo started"),
    )
    .unwrap();
    let future = AfterTask::new(task)
        .on_success(move |out| {
            *sink.borrow_mut() = Some(out);
            Ok(())
        })
        .start()
        .unwrap();

    let mut slowest = Duration::ZERO;
    while !future.is_done() {
        let begun = Instant::now();
        future.poll().unwrap();
        slowest = slowest.max(begun.elapsed());
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(slowest < Duration::from_millis(200), "a poll took {slowest:?}");
    assert_eq!(output.borrow().as_ref().unwrap().stdout, "started\n");
}
