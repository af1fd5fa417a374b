//! `scoring-runner <program>`: execute a contestant scoring program's `score` once.

use codeworld_core::lang::heap::CountingAlloc;
use codeworld_core::RunnerKind;

#[global_allocator]
static HEAP: CountingAlloc = CountingAlloc;

fn main() -> anyhow::Result<()> {
    let code = codeworld_runner::run(RunnerKind::Scoring)?;
    std::process::exit(code)
}
