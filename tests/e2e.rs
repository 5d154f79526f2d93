//! End-to-end scenarios: source text in, stdout out, exercising the whole
//! pipeline (parse, comptime resolution, sema, lowering, VM execution).
//! Mirrors how `wasmi-labs-wasmi`'s own CLI snapshot tests drive a module
//! by feeding it text and checking observable output rather than internal
//! state.

use ctlang::compile;
use ctlang::vm::Vm;

fn run_and_capture(src: &str) -> String {
    let compiled = compile(src).unwrap_or_else(|e| panic!("compile error: {e}"));
    let mut out = Vec::new();
    let mut vm = Vm::new();
    vm.run_to(&compiled.image, &mut out)
        .unwrap_or_else(|trap| panic!("trap: {trap}"));
    String::from_utf8(out).unwrap()
}

#[test]
fn arithmetic_respects_precedence() {
    let src = "func main(): s32 begin print 1 + 2 * 3 return 0 end";
    assert_eq!(run_and_capture(src), "7\n");
}

#[test]
fn while_loop_prints_counter() {
    let src = "func main(): s32 begin \
               var i: s32 i := 0 \
               while i < 3 do begin print i i := i + 1 end \
               return 0 end";
    assert_eq!(run_and_capture(src), "0\n1\n2\n");
}

#[test]
fn recursive_fib_matches_closed_form() {
    let src = "func fib(n: s32): s32 begin \
               if n = 0 then return 0 \
               if n = 1 then return 1 \
               return fib(n-1) + fib(n-2) \
               end \
               func main(): s32 begin print fib(10) return 0 end";
    assert_eq!(run_and_capture(src), "55\n");
}

#[test]
fn comptime_eval_resolves_before_lowering_main() {
    let src = "func zero(): s32 begin return 0 end \
               func fib(n: s32): s32 begin \
               if n = 0 then return @eval(zero()) \
               if n = 1 then return 1 \
               return fib(n-1) + fib(n-2) \
               end \
               func main(): s32 begin print @eval(fib(10)) return 0 end";
    assert_eq!(run_and_capture(src), "55\n");
}

#[test]
fn struct_field_access_reads_and_writes_through_lea() {
    let src = "struct P := a: s32, b: s32 \
               func main(): s32 begin \
               var p: P \
               p.a := 10 \
               p.b := 32 \
               print p.a + p.b \
               return 0 end";
    assert_eq!(run_and_capture(src), "42\n");
}

#[test]
fn global_array_access_sums_elements() {
    let src = "var xs: s32[3] \
               func main(): s32 begin \
               xs[0] := 7 \
               xs[1] := 8 \
               xs[2] := 9 \
               print xs[0] + xs[1] + xs[2] \
               return 0 end";
    assert_eq!(run_and_capture(src), "24\n");
}

#[test]
fn break_outside_loop_is_a_compile_error() {
    let src = "func main(): s32 begin break return 0 end";
    let err = compile(src).unwrap_err();
    assert!(matches!(
        err,
        ctlang::error::CompileError::Frontend(ctlang::error::FrontendError::Sema(
            ctlang::error::SemaError::BreakOutsideLoop { .. }
        ))
    ));
}

#[test]
fn nested_loop_break_binds_to_innermost() {
    let src = "func main(): s32 begin \
               var i: s32 i := 0 \
               while i < 2 do begin \
               var j: s32 j := 0 \
               while j < 10 do begin \
               if j = 1 then break \
               print j \
               j := j + 1 \
               end \
               print i \
               i := i + 1 \
               end \
               return 0 end";
    assert_eq!(run_and_capture(src), "0\n0\n0\n1\n");
}
