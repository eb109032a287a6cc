//! End-to-end call-chain tests.
//!
//! These exercise the full call/return protocol the way compiled
//! bodies use it: hand-compiled `Func` implementations of
//! `f(x) = x > 0 ? f(x - 1) + 1 : 100`, run through the shared-stack
//! and owned-registers conventions, plus tail-call and suspend/resume
//! chains.

use std::sync::Arc;

use tarn_core::{
    dispatch, CoYield, Control, Coroutine, Flow, Func, OwnedRegisters, Registers, ResumePoint,
    ReturnTarget, RuntimeError, StackConfig, StackView, Suspension, Value,
};

// =============================================================================
// Shared-Stack Convention
// =============================================================================

/// `f(x) = x > 0 ? f(x - 1) + 1 : base_value`, with the function value
/// in register 0 and `x` in register 1. Nested calls anchor the callee
/// one slot higher with `from(1)` and read the result back out of
/// register 0 — no argument or result is ever copied between frames.
struct SharedCounter {
    base_value: i64,
}

impl Func for SharedCounter {
    fn call(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let r0 = frame.get(0);
        let l = frame.get(1).as_int().unwrap();

        if l > 0 {
            let f = r0.as_func().unwrap().clone();

            let call_frame = frame.from(1);
            call_frame.set(0, r0);
            call_frame.set(1, Value::Int(l - 1));
            call_frame.set_top(2)?;

            let call_ret = frame.return_target_from(0);
            match f.call(call_frame, &call_ret)? {
                Control::Return => {}
                other => panic!("unexpected control: {:?}", other),
            }

            let m = frame.get(0).as_int().unwrap();
            ret.begin();
            ret.push(Value::Int(m + 1));
            ret.end()?;
        } else {
            ret.begin();
            ret.push(Value::Int(self.base_value));
            ret.end()?;
        }
        Ok(Control::Return)
    }
}

#[test]
fn shared_stack_chain_computes_120() {
    let stack = tarn_core::RegisterStack::new(&StackConfig::default());
    let f: Arc<dyn Func> = Arc::new(SharedCounter { base_value: 100 });

    let root = stack.root_view();
    root.set(0, Value::func(f.clone()));
    root.set(1, Value::Int(20));
    root.set_top(2).unwrap();

    let flow = dispatch::call(&stack, &f, 0, 0).unwrap();
    assert!(matches!(flow, Flow::Done));
    assert_eq!(stack.get(0), Value::Int(120));
    assert_eq!(stack.top(), 1);
}

// =============================================================================
// Owned-Registers Convention
// =============================================================================

/// The same function over private fixed-capacity frames: every call
/// allocates its own registers and results travel through the
/// transactional return target.
struct OwnedCounter {
    base_value: i64,
}

impl OwnedCounter {
    fn new_registers(&self) -> OwnedRegisters {
        OwnedRegisters::new(2)
    }

    fn call(&self, regs: &OwnedRegisters, ret: &ReturnTarget<'_>) -> Result<(), RuntimeError> {
        let l = regs.get(0).as_int().unwrap();

        if l > 0 {
            let callee = self.new_registers();
            callee.push(Value::Int(l - 1));

            let inner_ret = regs.return_target_from(0);
            self.call(&callee, &inner_ret)?;

            let m = regs.get(0).as_int().unwrap();
            ret.begin();
            ret.push(Value::Int(m + 1));
            ret.end()?;
        } else {
            ret.begin();
            ret.push(Value::Int(self.base_value));
            ret.end()?;
        }
        Ok(())
    }
}

#[test]
fn owned_registers_chain_computes_120() {
    let f = OwnedCounter { base_value: 100 };
    let out = OwnedRegisters::new(1);

    let regs = f.new_registers();
    regs.push(Value::Int(20));

    f.call(&regs, &out.return_target_from(0)).unwrap();
    assert_eq!(out.get(0), Value::Int(120));
    assert_eq!(out.top(), 1);
}

// =============================================================================
// Tail Calls
// =============================================================================

/// Tail-recursive accumulator: `f(acc, n) = n > 0 ? f(acc + 1, n - 1)
/// : acc`, with the function value in register 0. The recursive call
/// is the frame's final action, so it is a `TailCall` and reuses the
/// frame.
struct TailAccum;

impl Func for TailAccum {
    fn call(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let this = frame.get(0);
        let acc = frame.get(1).as_int().unwrap();
        let n = frame.get(2).as_int().unwrap();

        if n > 0 {
            frame.set(1, Value::Int(acc + 1));
            frame.set(2, Value::Int(n - 1));
            let next = this.as_func().unwrap().clone();
            return Ok(Control::TailCall(next));
        }

        ret.begin();
        ret.push(Value::Int(acc));
        ret.end()?;
        Ok(Control::Return)
    }
}

/// The non-tail equivalent: `g(acc, n) = n > 0 ? g(acc, n - 1) + 1 :
/// acc`, growing one shared-stack frame per step.
struct PlainAccum;

impl Func for PlainAccum {
    fn call(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let this = frame.get(0);
        let acc = frame.get(1).as_int().unwrap();
        let n = frame.get(2).as_int().unwrap();

        if n > 0 {
            let f = this.as_func().unwrap().clone();
            let call_frame = frame.from(1);
            call_frame.set(0, this);
            call_frame.set(1, Value::Int(acc));
            call_frame.set(2, Value::Int(n - 1));
            call_frame.set_top(3)?;

            let call_ret = frame.return_target_from(0);
            f.call(call_frame, &call_ret)?;

            let m = frame.get(0).as_int().unwrap();
            ret.begin();
            ret.push(Value::Int(m + 1));
            ret.end()?;
        } else {
            ret.begin();
            ret.push(Value::Int(acc));
            ret.end()?;
        }
        Ok(Control::Return)
    }
}

fn run_accum(f: Arc<dyn Func>, acc: i64, n: i64, config: &StackConfig) -> (i64, usize) {
    let stack = tarn_core::RegisterStack::new(config);
    let root = stack.root_view();
    root.set(0, Value::func(f.clone()));
    root.set(1, Value::Int(acc));
    root.set(2, Value::Int(n));
    root.set_top(3).unwrap();

    let flow = dispatch::call(&stack, &f, 0, 0).unwrap();
    assert!(matches!(flow, Flow::Done));
    (stack.get(0).as_int().unwrap(), stack.capacity())
}

#[test]
fn tail_call_depth_10k_does_not_grow_the_chain() {
    let config = StackConfig::default();
    let initial_capacity = config.initial_capacity;

    let (result, capacity) = run_accum(Arc::new(TailAccum), 0, 10_000, &config);
    assert_eq!(result, 10_000);
    // One reused frame: the stack never grew past its initial slots.
    assert_eq!(capacity, initial_capacity);
}

#[test]
fn tail_and_plain_chains_agree() {
    let config = StackConfig::default();
    let n = 1_000;
    let (tail_result, _) = run_accum(Arc::new(TailAccum), 7, n, &config);
    let (plain_result, plain_capacity) = run_accum(Arc::new(PlainAccum), 7, n, &config);

    assert_eq!(tail_result, plain_result);
    assert_eq!(tail_result, 7 + n);
    // The plain chain really did grow a frame per step.
    assert!(plain_capacity > config.initial_capacity);
}

// =============================================================================
// Suspension Inside a Nested Call
// =============================================================================

/// Inner body: yields `x * 2`, then returns `sent + 1` where `sent`
/// is the value delivered by the resume. `x` stays live in register 0
/// across the suspension.
struct YieldingInner;

impl Func for YieldingInner {
    fn call(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let x = frame.get(0).as_int().unwrap();

        frame.set_top(2)?;
        frame.set(1, Value::Int(x * 2));
        let mut s = Suspension::new(frame.base() + 1, 1);
        s.push_frame(Arc::new(YieldingInner), frame, ret, ResumePoint(0));
        Ok(Control::Suspend(s))
    }

    fn resume(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
        point: ResumePoint,
    ) -> Result<Control, RuntimeError> {
        assert_eq!(point, ResumePoint(0));
        // Register 0 must hold the exact value it had at the yield.
        let x = frame.get(0).as_int().unwrap();
        let sent = frame.get(1).as_int().unwrap();
        debug_assert!(x >= 0);

        ret.begin();
        ret.push(Value::Int(sent + 1));
        ret.end()?;
        Ok(Control::Return)
    }
}

/// Outer body: calls the inner function held in register 0 with the
/// argument in register 1, then adds 10 to its result.
struct SuspendingOuter;

impl SuspendingOuter {
    fn finish(
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let m = frame.get(1).as_int().unwrap();
        ret.begin();
        ret.push(Value::Int(m + 10));
        ret.end()?;
        Ok(Control::Return)
    }
}

impl Func for SuspendingOuter {
    fn call(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
    ) -> Result<Control, RuntimeError> {
        let inner = frame.get(0).as_func().unwrap().clone();
        let x = frame.get(1);

        let call_frame = frame.from(1);
        call_frame.set(0, x);
        call_frame.set_top(1)?;

        let call_ret = frame.return_target_from(1);
        match inner.call(call_frame, &call_ret)? {
            Control::Return => SuspendingOuter::finish(frame, ret),
            Control::Suspend(mut s) => {
                s.push_frame(Arc::new(SuspendingOuter), frame, ret, ResumePoint(0));
                Ok(Control::Suspend(s))
            }
            Control::TailCall(_) => unreachable!("inner never tail-calls"),
        }
    }

    fn resume(
        &self,
        frame: StackView<'_>,
        ret: &ReturnTarget<'_>,
        point: ResumePoint,
    ) -> Result<Control, RuntimeError> {
        assert_eq!(point, ResumePoint(0));
        // The nested call has committed its result into register 1.
        SuspendingOuter::finish(frame, ret)
    }
}

#[test]
fn suspend_in_nested_call_reproduces_state_and_result() {
    let inner: Arc<dyn Func> = Arc::new(YieldingInner);
    let outer: Arc<dyn Func> = Arc::new(SuspendingOuter);
    let co = Coroutine::new(outer, &StackConfig::default());

    let yielded = co
        .resume(&[Value::func(inner), Value::Int(5)])
        .unwrap();
    assert_eq!(yielded, CoYield::Yield(vec![Value::Int(10)]));

    // The suspended chain's registers are exactly the stack contents:
    // the inner frame's x (absolute register 1) survived the yield.
    assert_eq!(co.stack().get(1), Value::Int(5));
    assert_eq!(co.stack().get(2), Value::Int(10));

    let finished = co.resume(&[Value::Int(7)]).unwrap();
    // Non-suspended equivalent: (7 + 1) + 10.
    assert_eq!(finished, CoYield::Return(vec![Value::Int(18)]));
}
