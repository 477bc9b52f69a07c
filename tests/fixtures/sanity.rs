// sanity asks gdb and lldb to echo constant values back through the
// harness. It exercises the test system itself more than the compiler.

fn main() {
    // BREAKPOINT
    // (gdb) print 1
    // \$1 = 1
    // (lldb) p 2
    // \(int\) 2
    let _ = 42;
    // Need at least one statement above so the breakpoint line has code
    // to land on.
}
