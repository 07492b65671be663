// crates/test-utils/src/builders.rs

//! Fluent construction of small task graphs for tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cachedag::exec::TaskContext;
use cachedag::model::{
    value, BodyResult, Segments, TaskArena, TaskBuilder, TaskId, TaskValue,
};

/// Wraps a [`TaskArena`] with shortcuts for the task shapes tests use
/// over and over.
#[derive(Default)]
pub struct GraphBuilder {
    arena: TaskArena,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            arena: TaskArena::new(),
        }
    }

    /// Add any task built by hand.
    pub fn add(&mut self, builder: TaskBuilder) -> TaskId {
        self.arena.add(builder.build())
    }

    /// Anonymous task returning a constant.
    pub fn constant(&mut self, v: i32, side_hash: i32) -> TaskId {
        self.add(
            TaskBuilder::new(move |_ctx| Ok(value(v)))
                .side_hash(side_hash),
        )
    }

    /// Named task returning a constant, JSON-cacheable.
    pub fn named_constant(&mut self, path: &str, v: i32, side_hash: i32) -> TaskId {
        self.add(
            TaskBuilder::new(move |_ctx| Ok(value(v)))
                .named(Segments::parse(path))
                .json_format::<i32>()
                .side_hash(side_hash),
        )
    }

    /// Named task summing its `i32` inputs, JSON-cacheable.
    pub fn named_sum(&mut self, path: &str, inputs: &[TaskId], side_hash: i32) -> TaskId {
        self.add(
            TaskBuilder::new(sum_body)
                .inputs(inputs.iter().copied())
                .named(Segments::parse(path))
                .json_format::<i32>()
                .side_hash(side_hash),
        )
    }

    /// Anonymous task summing its `i32` inputs.
    pub fn sum(&mut self, inputs: &[TaskId], side_hash: i32) -> TaskId {
        self.add(
            TaskBuilder::new(sum_body)
                .inputs(inputs.iter().copied())
                .side_hash(side_hash),
        )
    }

    /// Named task whose body always fails with the given message.
    pub fn named_failing(&mut self, path: &str, msg: &str, side_hash: i32) -> TaskId {
        let msg = msg.to_string();
        self.add(
            TaskBuilder::new(move |_ctx| {
                Err(cachedag::model::TaskFailure::new(msg.clone()))
            })
            .named(Segments::parse(path))
            .json_format::<i32>()
            .side_hash(side_hash),
        )
    }

    /// Named task whose body panics.
    pub fn named_panicking(&mut self, path: &str, msg: &'static str, side_hash: i32) -> TaskId {
        self.add(
            TaskBuilder::new(move |_ctx| -> BodyResult { panic!("{}", msg) })
                .named(Segments::parse(path))
                .json_format::<i32>()
                .side_hash(side_hash),
        )
    }

    /// Named worker counting its invocations in `counter`, returning the
    /// invocation number.
    pub fn worker_counter(
        &mut self,
        path: &str,
        counter: Arc<AtomicUsize>,
        side_hash: i32,
    ) -> TaskId {
        self.add(
            TaskBuilder::new(move |_ctx| {
                let n = counter.fetch_add(1, Ordering::SeqCst) as i32 + 1;
                Ok(value(n))
            })
            .named(Segments::parse(path))
            .worker()
            .side_hash(side_hash),
        )
    }

    pub fn arena(&self) -> &TaskArena {
        &self.arena
    }

    pub fn build(self) -> Arc<TaskArena> {
        Arc::new(self.arena)
    }
}

fn sum_body(ctx: &mut TaskContext<'_>) -> BodyResult {
    let mut total = 0i32;
    for index in 0..ctx.args().len() {
        total += *ctx.arg_as::<i32>(index)?;
    }
    Ok(value(total))
}

/// Downcast a task value to `i32`, panicking with a useful message in
/// tests.
pub fn as_i32(v: &TaskValue) -> i32 {
    *cachedag::model::value_as::<i32>(v).expect("value is not an i32")
}
