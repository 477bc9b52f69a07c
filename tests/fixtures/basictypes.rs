// basictypes tests the debuggers' ability to interpret basic types.

fn stack() {
    let mut i: i32 = 0;
    // BREAKPOINT
    // (gdb) print i
    // \$[0-9]+ = 0
    i = 5;
    // BREAKPOINT
    // (gdb) print i
    // \$[0-9]+ = 5
    // (gdb) info locals
    // i = 5
    // b = false
    // (lldb) p i
    // \(i32\) 5
    let b = false;
    // BREAKPOINT
    // (gdb) print b
    // \$[0-9]+ = false
    let _ = (i, b);
}

fn heap() -> (Box<i32>, Box<bool>) {
    let i = Box::new(5);
    let b = Box::new(false);
    /* BROKEN, SKIPPED:
    // BREAKPOINT
    // (gdb) print *i
    // \$[0-9]+ = 5
    // (gdb) print *b
    // \$[0-9]+ = false
    */
    (i, b)
}

fn main() {
    stack();
    let _ = heap();
}
