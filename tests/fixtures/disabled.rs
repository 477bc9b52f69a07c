// disabled carries only a block-commented directive group; the parser must
// produce no breakpoints for it.

fn main() {
    let x = 5;
    /*
    // BREAKPOINT
    // (gdb) print x
    // \$1 = 5
    */
    let _ = x;
}
