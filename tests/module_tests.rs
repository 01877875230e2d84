//! Embedded modules and native calls across the boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use holdfast::{
    impl_native, BridgeError, CallContext, ClassBuilder, ConversionError, Dynamic, Host,
    InitOptions, Interpreter, ModuleBuilder, ModuleFactory, NativeError, Outbound,
};

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}
impl_native!(Point => "Point");

#[derive(Debug)]
struct Token {
    id: u32,
}
impl_native!(Token => "Token");

fn geometry(m: &mut ModuleBuilder<'_>) -> holdfast::Result<()> {
    m.add_class(ClassBuilder::<Point>::new())?;
    m.add_class(ClassBuilder::<Token>::new())?;
    m.add_object("origin", Outbound::value(Point { x: 0, y: 0 }))?;
    m.add_value("dimensions", Dynamic::Int(2));

    m.def("make_point", |ctx: &mut CallContext| {
        let x: i32 = ctx.arg(0)?;
        let y: i32 = ctx.arg(1)?;
        ctx.return_native(Outbound::value(Point { x, y }))
    });
    m.def("shift", |ctx: &mut CallContext| {
        let dx: i32 = ctx.arg(1)?;
        ctx.arg_mut::<Point>(0)?.x += dx;
        Ok(())
    });
    m.def("norm1", |ctx: &mut CallContext| {
        let point = ctx.arg_ref::<Point>(0)?;
        let norm = i64::from(point.x.abs() + point.y.abs());
        ctx.set_return(norm);
        Ok(())
    });
    m.def("consume", |ctx: &mut CallContext| {
        let token = ctx.take_arg::<Token>(0)?;
        ctx.set_return(i64::from(token.id));
        Ok(())
    });
    m.def("consume_with_deleter", |ctx: &mut CallContext| {
        let token = ctx.take_arg_with_deleter::<Token>(0)?;
        ctx.set_return(i64::from(token.id));
        Ok(())
    });
    m.def("share", |ctx: &mut CallContext| {
        let token = ctx.arg_shared::<Token>(0)?;
        ctx.return_native(Outbound::shared(token))
    });
    m.def("identity", |ctx: &mut CallContext| ctx.return_arg(0));
    m.def("fail", |_: &mut CallContext| Err(NativeError::other("refused")));
    Ok(())
}

static BROKEN_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

fn broken(m: &mut ModuleBuilder<'_>) -> holdfast::Result<()> {
    BROKEN_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
    m.add_class(ClassBuilder::<Point>::new())?;
    m.add_object("partial", Outbound::value(Point { x: 1, y: 1 }))?;
    // Second registration of the same type fails the factory.
    m.add_class(ClassBuilder::<Point>::new())?;
    Ok(())
}

static COUNTED_INITS: AtomicUsize = AtomicUsize::new(0);

fn counted(m: &mut ModuleBuilder<'_>) -> holdfast::Result<()> {
    COUNTED_INITS.fetch_add(1, Ordering::SeqCst);
    m.add_value("version", Dynamic::Int(1));
    Ok(())
}

const GEOMETRY: (&str, ModuleFactory) = ("geometry", geometry);
const BROKEN: (&str, ModuleFactory) = ("broken", broken);
const COUNTED: (&str, ModuleFactory) = ("counted", counted);

fn run<R>(modules: &[(&str, ModuleFactory)], f: impl FnOnce(&mut Interpreter) -> R) -> R {
    let host = Host::new();
    for (name, factory) in modules {
        host.register_embedded_module(name, *factory).unwrap();
    }
    host.initialize(&InitOptions::new().add_program_dir_to_path(false));
    let result = host.with_interpreter(f);
    host.finalize();
    result
}

fn call(interp: &mut Interpreter, module: &Dynamic, name: &str, args: &[Dynamic]) -> holdfast::Result<Dynamic> {
    interp.call_attr(module, name, args)
}

#[test]
fn import_runs_factory_once_per_session() {
    run(&[COUNTED, GEOMETRY], |interp| {
        let first = interp.import("counted").unwrap();
        let second = interp.import("counted").unwrap();
        assert_eq!(first, second);
        assert_eq!(interp.type_name_of(&first), "module");
        assert_eq!(interp.getattr(&first, "version").unwrap(), Dynamic::Int(1));
        interp.release(&first).unwrap();
        interp.release(&second).unwrap();

        let geometry = interp.import("geometry").unwrap();
        assert_eq!(interp.module(&geometry).unwrap().classes().len(), 2);
        assert_eq!(interp.getattr(&geometry, "dimensions").unwrap(), Dynamic::Int(2));
        interp.release(&geometry).unwrap();
    });
    assert_eq!(COUNTED_INITS.load(Ordering::SeqCst), 1);

    run(&[COUNTED], |interp| {
        let module = interp.import("counted").unwrap();
        interp.release(&module).unwrap();
    });
    assert_eq!(COUNTED_INITS.load(Ordering::SeqCst), 2);
}

#[test]
fn over_released_module_is_reported_stale() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        assert_eq!(interp.ref_count(&geometry), Some(2));
        interp.release(&geometry).unwrap();
        assert!(interp.release(&geometry).unwrap());
        assert!(!interp.is_live(&geometry));

        for _ in 0..2 {
            assert!(matches!(
                interp.import("geometry"),
                Err(BridgeError::StaleHandle { .. })
            ));
        }
        assert!(matches!(
            interp.release(&geometry),
            Err(BridgeError::StaleHandle { .. })
        ));
    });
}

#[test]
fn unknown_module_and_attribute() {
    run(&[GEOMETRY], |interp| {
        assert!(matches!(
            interp.import("nope"),
            Err(BridgeError::ModuleNotFound { ref name }) if name == "nope"
        ));
        let geometry = interp.import("geometry").unwrap();
        assert!(matches!(
            interp.getattr(&geometry, "missing"),
            Err(BridgeError::AttributeNotFound { ref owner, .. }) if owner == "geometry"
        ));
        assert!(matches!(
            interp.getattr(&Dynamic::Int(1), "x"),
            Err(BridgeError::AttributeNotFound { .. })
        ));
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn failed_factory_leaves_nothing_behind() {
    let before = BROKEN_ATTEMPTS.load(Ordering::SeqCst);
    run(&[BROKEN], |interp| {
        for _ in 0..2 {
            assert!(matches!(
                interp.import("broken"),
                Err(BridgeError::DuplicateRegistration { .. })
            ));
            assert_eq!(interp.outstanding_instances(), 0);
        }
    });
    assert!(BROKEN_ATTEMPTS.load(Ordering::SeqCst) >= before + 2);
}

#[test]
fn module_object_is_shared_by_attribute_lookups() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let origin = interp.getattr(&geometry, "origin").unwrap();
        assert_eq!(interp.type_name_of(&origin), "Point");
        assert_eq!(interp.ref_count(&origin), Some(2));
        assert_eq!(interp.load_value::<Point>(&origin).unwrap(), Point { x: 0, y: 0 });
        assert!(!interp.release(&origin).unwrap());
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn returned_values_are_owned_by_caller() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let point = call(interp, &geometry, "make_point", &[Dynamic::Int(3), Dynamic::Int(-4)]).unwrap();
        assert_eq!(interp.ref_count(&point), Some(1));
        assert_eq!(call(interp, &geometry, "norm1", &[point.clone()]).unwrap(), Dynamic::Int(7));

        call(interp, &geometry, "shift", &[point.clone(), Dynamic::Int(10)]).unwrap();
        assert_eq!(interp.load_value::<Point>(&point).unwrap(), Point { x: 13, y: -4 });

        let same = call(interp, &geometry, "identity", &[point.clone()]).unwrap();
        assert_eq!(same, point);
        assert_eq!(interp.ref_count(&point), Some(2));
        interp.release(&same).unwrap();
        assert!(interp.release(&point).unwrap());
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn exclusive_argument_disowns_caller_record() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let token = interp.cast(Outbound::value(Token { id: 9 })).unwrap();
        assert_eq!(call(interp, &geometry, "consume", &[token.clone()]).unwrap(), Dynamic::Int(9));

        assert!(matches!(
            interp.load_ref::<Token>(&token),
            Err(BridgeError::EmptyCell { disowned: true, .. })
        ));
        assert!(matches!(
            call(interp, &geometry, "consume", &[token.clone()]),
            Err(BridgeError::EmptyCell { disowned: true, .. })
        ));
        interp.release(&token).unwrap();
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn deleter_runs_where_the_argument_is_consumed() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&deleted);
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let token = interp
            .cast(Outbound::exclusive_with_deleter(Box::new(Token { id: 11 }), move |_: Box<Token>| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(matches!(
            call(interp, &geometry, "consume", &[token.clone()]),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        assert_eq!(deleted.load(Ordering::SeqCst), 0);

        let id = call(interp, &geometry, "consume_with_deleter", &[token.clone()]).unwrap();
        assert_eq!(id, Dynamic::Int(11));
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert!(matches!(
            interp.load_ref::<Token>(&token),
            Err(BridgeError::EmptyCell { disowned: true, .. })
        ));
        interp.release(&token).unwrap();
        interp.release(&geometry).unwrap();
    });
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_argument_comes_back_as_second_owner() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let token = interp.cast(Outbound::value(Token { id: 4 })).unwrap();
        let shared = call(interp, &geometry, "share", &[token.clone()]).unwrap();
        assert_ne!(shared, token);

        let a = interp.load_shared::<Token>(&token).unwrap();
        let b = interp.load_shared::<Token>(&shared).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            call(interp, &geometry, "consume", &[shared.clone()]),
            Err(BridgeError::OwnershipConflict { .. })
        ));

        interp.release(&token).unwrap();
        interp.release(&shared).unwrap();
        assert_eq!(Arc::strong_count(&a), 2);
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn native_errors_surface_to_the_caller() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();

        let err = call(interp, &geometry, "fail", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Native(NativeError::Other { ref message }) if message == "refused"));

        let err = call(interp, &geometry, "make_point", &[Dynamic::Int(i64::MAX), Dynamic::Int(0)]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Native(NativeError::Conversion(ConversionError::IntegerOverflow { .. }))
        ));

        let err = call(interp, &geometry, "make_point", &[Dynamic::Int(1)]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Native(NativeError::ArgumentIndexOutOfBounds { index: 1, count: 1 })
        ));

        let dimensions = interp.getattr(&geometry, "dimensions").unwrap();
        assert!(matches!(
            interp.call(&dimensions, &[]),
            Err(BridgeError::NotCallable { actual: "int" })
        ));
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn borrowed_argument_rejects_mutation_inside_call() {
    run(&[GEOMETRY], |interp| {
        let geometry = interp.import("geometry").unwrap();
        let point = Point { x: 1, y: 1 };
        let obj = unsafe { interp.cast(Outbound::reference(&point)) }.unwrap();

        let err = call(interp, &geometry, "shift", &[obj.clone(), Dynamic::Int(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::OwnershipConflict { .. }));
        assert_eq!(call(interp, &geometry, "norm1", &[obj.clone()]).unwrap(), Dynamic::Int(2));
        interp.release(&obj).unwrap();
        interp.release(&geometry).unwrap();
    });
}

#[test]
fn closures_become_callables() {
    run(&[], |interp| {
        let offset = 5i64;
        let add = interp.make_function("add_offset", move |ctx: &mut CallContext| {
            let value: i64 = ctx.arg(0)?;
            ctx.set_return(value + offset);
            Ok(())
        });
        assert_eq!(interp.type_name_of(&add), "function");
        assert_eq!(interp.call(&add, &[Dynamic::Int(1)]).unwrap(), Dynamic::Int(6));
        assert!(interp.release(&add).unwrap());
        assert!(matches!(
            interp.call(&add, &[]),
            Err(BridgeError::StaleHandle { .. })
        ));
    });
}
