//! `strategy-runner <program>`: execute a strategy's `solve`/`main` once.

use codeworld_core::lang::heap::CountingAlloc;
use codeworld_core::RunnerKind;

#[global_allocator]
static HEAP: CountingAlloc = CountingAlloc;

fn main() -> anyhow::Result<()> {
    let code = codeworld_runner::run(RunnerKind::Strategy)?;
    std::process::exit(code)
}
