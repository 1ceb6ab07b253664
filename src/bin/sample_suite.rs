//! Fixture test binary
//!
//! A small suite covering every way a test can end: passing, failing under
//! both policies, crashing, hanging, printing, and parameterized runs. The
//! integration tests spawn it both as a collector and as a bare worker.

use std::any::Any;
use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crucible::worker::Param;
use crucible::{check, Harness, Registry, SuiteDescriptor, TestContext, TestDescriptor, TestResult};

fn passing(ctx: &mut TestContext<'_>) -> TestResult {
    let values = [1, 2, 3];
    ctx.assert(check!(values.len() == 3))?;
    ctx.assert(check::eq(&values.iter().sum::<i32>(), &6))?;
    ctx.expect(check::str_eq("crucible", "crucible"));
    Ok(())
}

fn mixed(ctx: &mut TestContext<'_>) -> TestResult {
    let value = 3;
    ctx.expect(check!(value > 0));
    ctx.expect(check!(value == 4, "bad value: {}", value));
    ctx.expect(check!(value < 10));
    Ok(())
}

fn abort_first(ctx: &mut TestContext<'_>) -> TestResult {
    ctx.assert(check::fail().because("giving up immediately"))?;
    ctx.expect(check!(true, "never evaluated"));
    Ok(())
}

fn default_message(ctx: &mut TestContext<'_>) -> TestResult {
    let name = "";
    ctx.expect(check::not_empty(name, "name").because(""));
    Ok(())
}

fn abort(ctx: &mut TestContext<'_>) -> TestResult {
    ctx.expect(check!(true));
    std::process::abort();
}

fn segfault(ctx: &mut TestContext<'_>) -> TestResult {
    ctx.expect(check!(true));
    // The runtime's own SIGSEGV handler ignores a raised (non-fault) signal
    unsafe {
        libc::signal(libc::SIGSEGV, libc::SIG_DFL);
        libc::raise(libc::SIGSEGV);
    }
    Ok(())
}

fn panics(ctx: &mut TestContext<'_>) -> TestResult {
    let empty: Vec<u8> = Vec::new();
    ctx.expect(check!(empty[0] == 0));
    Ok(())
}

fn caught_panic(ctx: &mut TestContext<'_>) -> TestResult {
    let empty: Vec<u8> = Vec::new();
    ctx.assert(crucible::check_panics!(empty[0]))
}

fn hang(ctx: &mut TestContext<'_>) -> TestResult {
    ctx.expect(check!(true));
    loop {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn noisy(ctx: &mut TestContext<'_>) -> TestResult {
    println!("hello from stdout");
    eprintln!("hello from stderr");
    let _ = std::io::stdout().flush();
    ctx.expect(check!(false, "noisy failure"));
    Ok(())
}

fn stdin_is_empty(ctx: &mut TestContext<'_>) -> TestResult {
    let mut input = String::new();
    let read = std::io::stdin().read_to_string(&mut input);
    ctx.assert(check!(read.is_ok()))?;
    ctx.assert(check::is_empty(&input, "stdin"))
}

fn small_numbers() -> Vec<Param> {
    vec![Box::new(1u32), Box::new(2u32), Box::new(7u32)]
}

fn below_five(ctx: &mut TestContext<'_>, param: &(dyn Any + Send)) -> TestResult {
    let value = param.downcast_ref::<u32>().copied();
    ctx.assert(check::is_some(&value, "param"))?;
    let value = value.unwrap_or_default();
    ctx.assert(check!(value < 5, "{} is not below five", value))
}

static SUITE_READY: AtomicBool = AtomicBool::new(false);
static TEST_READY: AtomicBool = AtomicBool::new(false);

fn suite_setup() {
    SUITE_READY.store(true, Ordering::SeqCst);
}

fn test_setup() {
    TEST_READY.store(SUITE_READY.load(Ordering::SeqCst), Ordering::SeqCst);
}

fn fixtures_ran(ctx: &mut TestContext<'_>) -> TestResult {
    ctx.assert(check!(SUITE_READY.load(Ordering::SeqCst)))?;
    ctx.assert(check!(TEST_READY.load(Ordering::SeqCst)))
}

fn registry() -> Registry {
    Registry::new()
        .test(TestDescriptor::new("basics", "passing", passing))
        .test(TestDescriptor::new("basics", "mixed", mixed))
        .test(TestDescriptor::new("basics", "abort_first", abort_first))
        .test(TestDescriptor::new("basics", "default_message", default_message))
        .test(TestDescriptor::new("crashes", "abort", abort))
        .test(TestDescriptor::new("crashes", "segfault", segfault))
        .test(TestDescriptor::new("crashes", "panic", panics))
        .test(TestDescriptor::new("panics", "caught", caught_panic))
        .test(TestDescriptor::new("timing", "hang", hang).timeout(Duration::from_secs(1)))
        .test(TestDescriptor::new("output", "noisy", noisy))
        .test(TestDescriptor::new("input", "stdin_is_empty", stdin_is_empty))
        .test(TestDescriptor::parameterized("params", "below_five", below_five, small_numbers))
        .suite(SuiteDescriptor::new("fixtures").init(suite_setup))
        .test(TestDescriptor::new("fixtures", "ran", fixtures_ran).init(test_setup))
}

fn main() -> ExitCode {
    Harness::new(registry()).run()
}
