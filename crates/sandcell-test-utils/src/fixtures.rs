//! Programs, inputs and cells shared by tests

use crate::fake::{ExecContext, FakeRuntime};
use sandcell_cell::{CellConfig, ExecCapture, IsolatedExecutionCell};
use sandcell_types::{InputArtifact, ProgramText, SandboxRoots};
use std::sync::Arc;
use std::time::Duration;

/// Blocked import
pub const BLOCKED_PROGRAM: &str = "import os\nos.listdir('/')";

/// Conditional import
pub const NEEDS_APPROVAL_PROGRAM: &str = "import requests\nrequests.get('https://x')";

/// Syntax error
pub const UNPARSEABLE_PROGRAM: &str = "print('hi'\n";

/// Reads `data.csv`, sums the `value` column and writes `result.csv`
pub const CSV_SUM_PROGRAM: &str = "\
import csv

total = 0
with open('/tmp/input/data.csv') as f:
    for row in csv.DictReader(f):
        total += int(row['value'])

with open('/tmp/output/result.csv', 'w') as f:
    f.write(f'total\\n{total}\\n')

print(total)
";

/// Never terminates
pub const INFINITE_LOOP_PROGRAM: &str = "while True:\n    pass\n";

/// Program text helper
pub fn program(source: &str) -> ProgramText {
    ProgramText::from(source)
}

/// `data.csv` with a `value` column summing to 6
pub fn csv_input() -> InputArtifact {
    InputArtifact::named("data.csv", b"name,value\na,1\nb,2\nc,3\n".to_vec())
        .unwrap_or_else(|e| panic!("fixture name is valid: {e}"))
}

/// Cell configuration with a short timeout
pub fn test_config() -> CellConfig {
    CellConfig::default().with_timeout(Duration::from_secs(2))
}

/// Cell over `runtime` with [`test_config`] and default roots
pub fn fake_cell(runtime: &Arc<FakeRuntime>) -> IsolatedExecutionCell {
    IsolatedExecutionCell::new(runtime.clone(), test_config(), SandboxRoots::default())
        .unwrap_or_else(|e| panic!("test configuration is valid: {e}"))
}

/// Simulated interpreter for [`CSV_SUM_PROGRAM`]
///
/// Sums the `value` column of `/tmp/input/data.csv`, writes
/// `/tmp/output/result.csv` and prints the total. Exits 1 with a Python-style
/// traceback if the input is missing.
pub fn csv_sum_behavior(ctx: &mut ExecContext<'_>) -> ExecCapture {
    let Some(data) = ctx.read("/tmp/input/data.csv") else {
        return ExecCapture {
            stdout: Vec::new(),
            stderr: b"FileNotFoundError: [Errno 2] No such file or directory: '/tmp/input/data.csv'\n".to_vec(),
            exit_status: 1,
        };
    };

    let text = String::from_utf8_lossy(data).into_owned();
    let mut lines = text.lines();
    let column = lines
        .next()
        .and_then(|header| header.split(',').position(|h| h == "value"))
        .unwrap_or(0);
    let total: i64 = lines
        .filter_map(|line| line.split(',').nth(column))
        .filter_map(|cell| cell.trim().parse::<i64>().ok())
        .sum();

    ctx.write("/tmp/output/result.csv", format!("total\n{total}\n"));
    ExecCapture {
        stdout: format!("{total}\n").into_bytes(),
        stderr: Vec::new(),
        exit_status: 0,
    }
}

/// Simulated interpreter that reports whether a marker from an earlier run
/// is visible, then leaves one behind
pub fn marker_behavior(ctx: &mut ExecContext<'_>) -> ExecCapture {
    let seen = ctx.read("/tmp/output/marker").is_some();
    ctx.write("/tmp/output/marker", b"set".to_vec());
    ExecCapture {
        stdout: if seen { b"leaked\n".to_vec() } else { b"fresh\n".to_vec() },
        stderr: Vec::new(),
        exit_status: 0,
    }
}

/// Simulated interpreter that fails like an uncaught exception
pub fn crash_behavior(_: &mut ExecContext<'_>) -> ExecCapture {
    ExecCapture {
        stdout: b"partial\n".to_vec(),
        stderr: b"Traceback (most recent call last):\nZeroDivisionError: division by zero\n".to_vec(),
        exit_status: 1,
    }
}
