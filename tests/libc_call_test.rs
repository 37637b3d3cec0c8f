//! Test calls into the C library and libm.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use dlcall::{args, Arg, CallError, Library, Out, TypeKind, Value};
use std::sync::OnceLock;
use std::thread;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn libc() -> Library {
    init();
    static LIBC: OnceLock<Library> = OnceLock::new();
    LIBC.get_or_init(|| {
        Library::open_with_signatures(
            "libc.so",
            &[
                "uint strlen(string s)",
                "int32 abs(int32 x)",
                "float64 atof(string s)",
                "int64 strtol(string s, pointer *end, int32 base)",
                "string strchr(string s, int32 c)",
                "int32 toupper(int32 c)",
                "float64 ldexp(float64 x, int32 exp)",
            ],
        )
        .unwrap()
    })
    .clone()
}

#[test]
fn test_strlen() {
    let result = libc().call("strlen", &mut args!["this"]).unwrap();
    assert_eq!(result, Some(Value::UInt(4)));
}

#[test]
fn test_abs() {
    let result = libc().call("abs", &mut args![-5]).unwrap();
    assert_eq!(result, Some(Value::Int32(5)));
}

#[test]
fn test_float_result() {
    let result = libc().call("atof", &mut args!["2.5"]).unwrap();
    assert_eq!(result, Some(Value::Float64(2.5)));
}

#[test]
fn test_mixed_float_and_integer_arguments() {
    let result = libc().call("ldexp", &mut args![1.5, 3]).unwrap();
    assert_eq!(result, Some(Value::Float64(12.0)));
}

#[test]
fn test_out_parameter() {
    let mut text = *b"42xyz\0";
    let start = text.as_ptr() as usize;
    let mut end = 0usize;

    let result = libc()
        .call(
            "strtol",
            &mut [
                Arg::from(&mut text[..]),
                Arg::Out(Out::Pointer(&mut end)),
                Arg::from(10),
            ],
        )
        .unwrap();

    assert_eq!(result, Some(Value::Int64(42)));
    assert_eq!(end - start, 2);
}

#[test]
fn test_string_result() {
    let library = libc();
    let found = library.call("strchr", &mut args!["hello", 'l' as i32]).unwrap();
    assert_eq!(found, Some(Value::String("llo".into())));

    let missing = library.call("strchr", &mut args!["hello", 'z' as i32]).unwrap();
    assert_eq!(missing, Some(Value::Null));
}

#[test]
fn test_string_pointer_result_is_the_string() {
    init();
    let library = Library::open("libc.so.6").unwrap();
    library.define_signature("string *strchr(string s, int32 c)").unwrap();
    assert_eq!(
        library.call("strchr", &mut args!["hello", 'e' as i32]).unwrap(),
        Some(Value::String("ello".into()))
    );
    assert_eq!(
        library.call("strchr", &mut args!["hello", 'z' as i32]).unwrap(),
        Some(Value::Null)
    );
}

#[test]
fn test_empty_path_opens_running_program() {
    init();
    let program = Library::open("").unwrap();
    assert_eq!(program.path(), "");
    program.define_signature("uint strlen(string s)").unwrap();
    assert_eq!(
        program.call("strlen", &mut args!["hello"]).unwrap(),
        Some(Value::UInt(5))
    );
    program.close().unwrap();
}

#[test]
fn test_string_arguments_convert_to_numbers() {
    let result = libc().call("toupper", &mut args!["97"]).unwrap();
    assert_eq!(result, Some(Value::Int32('A' as i32)));
}

#[test]
fn test_libm_pow() {
    init();
    let libm = Library::open("libm.so.6").unwrap();
    libm.define_signature("float64 pow(float64 x, float64 y)").unwrap();
    libm.define_signature("float32 sqrtf(float32 x)").unwrap();

    assert_eq!(
        libm.call("pow", &mut args![2.0, 10.0]).unwrap(),
        Some(Value::Float64(1024.0))
    );
    assert_eq!(
        libm.call("sqrtf", &mut args![9.0f32]).unwrap(),
        Some(Value::Float32(3.0))
    );
    libm.close().unwrap();
}

#[test]
fn test_extra_arguments_are_ignored() {
    let result = libc().call("strlen", &mut args!["abc", 1, 2.5]).unwrap();
    assert_eq!(result, Some(Value::UInt(3)));
}

#[test]
fn test_too_few_arguments_checked_before_encoding() {
    // The list would fail conversion if it were ever encoded.
    let err = libc()
        .call("strtol", &mut [Arg::List(vec![]), Arg::Null])
        .unwrap_err();
    assert_eq!(
        err,
        CallError::TooFewArguments {
            routine: "strtol".into(),
            expected: 3,
            actual: 2
        }
    );
}

#[test]
fn test_conversion_error_names_routine() {
    let err = libc().call("abs", &mut args!["abc"]).unwrap_err();
    assert!(matches!(
        err,
        CallError::ConversionError { routine: Some(ref name), index: 0, .. } if name == "abs"
    ));
}

#[test]
fn test_unknown_routine() {
    assert_eq!(
        libc().call("printf_undefined", &mut []),
        Err(CallError::RoutineNotFound {
            name: "printf_undefined".into()
        })
    );
}

#[test]
fn test_unknown_type_defines_nothing() {
    init();
    let library = Library::open("libc.so.6").unwrap();
    assert_eq!(
        library.define_signature("xxx print()"),
        Err(CallError::UnknownType { name: "xxx".into() })
    );
    assert!(library.routines().is_empty());
}

#[test]
fn test_handle_after_close() {
    init();
    let library = Library::open("libc.so.6").unwrap();
    library.define_signature("uint strlen(string s)").unwrap();
    let strlen = library.routine("strlen").unwrap();
    assert_eq!(strlen.call(&mut args!["ab"]).unwrap(), Some(Value::UInt(2)));

    library.close().unwrap();
    assert_eq!(strlen.call(&mut args!["ab"]), Err(CallError::LibraryClosed));
}

#[test]
fn test_data_symbol() {
    let library = libc();
    let environ = library
        .symbol("environ", dlcall::ArgumentDescriptor::direct(TypeKind::Pointer))
        .unwrap();
    assert!(matches!(environ, Value::Pointer(p) if p != 0));

    let address = library.symbol_address("environ").unwrap();
    assert_eq!(
        library
            .symbol("environ", dlcall::ArgumentDescriptor::indirect(TypeKind::Pointer))
            .unwrap(),
        Value::Pointer(address)
    );
}

#[test]
fn test_parallel_calls() {
    let library = libc();
    let workers: Vec<_> = (0..8)
        .map(|n| {
            let library = library.clone();
            thread::spawn(move || {
                let text = "x".repeat(n * 10);
                for _ in 0..100 {
                    let result = library.call("strlen", &mut args![text.as_str()]).unwrap();
                    assert_eq!(result, Some(Value::UInt(n * 10)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
