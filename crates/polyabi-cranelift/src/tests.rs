//! Tests for the representation transformer

use cranelift_codegen::ir::{AbiParam, Function, InstBuilder, Signature, Type, UserFuncName, Value, types};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::settings;
use cranelift_codegen::verify_function;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use polyabi_core::{
    AbiDatabase, CanonicalType, ExplosionKind, InvariantViolation, Protocol, ScalarType,
    Substitution, SubstitutionList, TargetInfo,
};

use crate::CompilationErrorKind;
use crate::emit::FunctionEmitter;
use crate::existential::ExistentialSubstitutionMap;
use crate::explosion::Explosion;
use crate::transform::{ReabstractionSession, resubstitute, unsubstitute};

/// Build a function taking `params`, run `body` in its entry block and
/// return the finished function.
fn build<R>(
    params: &[Type],
    body: impl FnOnce(&mut FunctionEmitter<'_>, Vec<Value>) -> R,
) -> (Function, R) {
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.extend(params.iter().map(|&ty| AbiParam::new(ty)));
    let mut func = Function::with_name_signature(UserFuncName::testcase("reabstract"), sig);
    let mut func_ctx = FunctionBuilderContext::new();

    let result = {
        let mut builder = FunctionBuilder::new(&mut func, &mut func_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let args = builder.block_params(entry).to_vec();

        let mut emitter = FunctionEmitter::new(builder, TargetInfo::POINTER_64);
        let result = body(&mut emitter, args);
        emitter.builder().ins().return_(&[]);
        emitter.finalize();
        result
    };
    (func, result)
}

fn verify(func: &Function) {
    let flags = settings::Flags::new(settings::builder());
    verify_function(func, &flags).unwrap();
}

fn count(func: &Function, opcode: &str) -> usize {
    func.display()
        .to_string()
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            line.starts_with(opcode) || line.contains(&format!("= {opcode}"))
        })
        .count()
}

fn value_types(func: &Function, values: &[Value]) -> Vec<Type> {
    values.iter().map(|&v| func.dfg.value_type(v)).collect()
}

fn bind<'db>(
    db: &'db AbiDatabase,
    pairs: &[(CanonicalType<'db>, CanonicalType<'db>)],
) -> SubstitutionList<'db> {
    let mut subs = SubstitutionList::new();
    for &(archetype, replacement) in pairs {
        subs.push(db, Substitution::bind(db, archetype, replacement))
            .unwrap();
    }
    subs
}

#[test]
fn identical_types_forward_values() {
    let db = AbiDatabase::default();
    let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
    let f64_ty = CanonicalType::scalar(&db, ScalarType::F64);
    let pair = CanonicalType::tuple(&db, vec![i32_ty, f64_ty]);
    let subs = SubstitutionList::new();

    let (func, (args, out)) = build(&[types::I32, types::F64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args.clone());
        let (out, existentials) = unsubstitute(emitter, &db, &subs, pair, pair, &mut src).unwrap();
        assert!(existentials.is_empty());
        (args, out)
    });

    verify(&func);
    assert_eq!(out.values(), args.as_slice());
    assert_eq!(count(&func, "load"), 0);
    assert_eq!(count(&func, "store"), 0);
}

#[test]
fn concrete_values_are_boxed_and_unboxed() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let i64_ty = CanonicalType::scalar(&db, ScalarType::I64);
    let pair = CanonicalType::tuple(&db, vec![i64_ty, i64_ty]);
    let subs = bind(&db, &[(t, pair)]);

    let (func, (boxed, unboxed)) = build(&[types::I64, types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        let (boxed, existentials) = unsubstitute(emitter, &db, &subs, t, pair, &mut src).unwrap();
        assert!(src.is_exhausted());

        let mut abstract_value = boxed.clone();
        let unboxed = resubstitute(emitter, &db, &subs, existentials, t, pair, &mut abstract_value)
            .unwrap();
        (boxed, unboxed)
    });

    verify(&func);
    assert_eq!(value_types(&func, boxed.values()), vec![types::I64]);
    assert_eq!(
        value_types(&func, unboxed.values()),
        vec![types::I64, types::I64]
    );
    assert_eq!(count(&func, "stack_addr"), 1);
    assert_eq!(count(&func, "store"), 2);
    assert_eq!(count(&func, "load"), 2);
}

#[test]
fn nested_round_trip_preserves_scalar_types() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let u = CanonicalType::archetype(&db, "U", false, vec![]);
    let i8_ty = CanonicalType::scalar(&db, ScalarType::I8);
    let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
    let f64_ty = CanonicalType::scalar(&db, ScalarType::F64);
    let ints = CanonicalType::tuple(&db, vec![i32_ty, i32_ty]);

    let orig = CanonicalType::tuple(&db, vec![t, CanonicalType::tuple(&db, vec![i8_ty, u])]);
    let subst = CanonicalType::tuple(&db, vec![f64_ty, CanonicalType::tuple(&db, vec![i8_ty, ints])]);
    let subs = bind(&db, &[(t, f64_ty), (u, ints)]);
    let params = [types::F64, types::I8, types::I32, types::I32];

    let (func, (args, abstract_values, round_trip)) = build(&params, |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args.clone());
        let mut abstract_value = session.unsubstitute(orig, subst, &mut src).unwrap();
        let abstract_values = abstract_value.values().to_vec();
        let round_trip = session.resubstitute(orig, subst, &mut abstract_value).unwrap();
        (args, abstract_values, round_trip)
    });

    verify(&func);
    assert_eq!(
        value_types(&func, &abstract_values),
        vec![types::I64, types::I8, types::I64]
    );
    assert_eq!(value_types(&func, round_trip.values()), params.to_vec());
    // The i8 needs no conversion and is forwarded in both directions.
    assert_eq!(round_trip.values()[1], args[1]);
}

#[test]
fn existential_is_opened_once_per_archetype() {
    let db = AbiDatabase::default();
    let shape = Protocol::new(
        &db,
        "Shape".to_string(),
        vec!["area".to_string(), "draw".to_string()],
    );
    let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
    let any_shape = CanonicalType::existential(&db, shape);
    let orig = CanonicalType::tuple(&db, vec![t, t]);
    let subst = CanonicalType::tuple(&db, vec![any_shape, any_shape]);
    let subs = bind(&db, &[(t, any_shape)]);

    let (func, existentials) = build(&[types::I64, types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        let (out, existentials) =
            unsubstitute(emitter, &db, &subs, orig, subst, &mut src).unwrap();
        assert_eq!(out.len(), 2);
        existentials
    });

    verify(&func);
    let record = existentials.get(t).unwrap();
    assert_eq!(record.protocol_type, any_shape);
    assert_eq!(record.witnesses.len(), 2);
    // metadata, witness table, two witnesses, then one payload per container
    assert_eq!(count(&func, "load"), 6);
}

#[test]
fn existential_is_rebuilt_from_session_record() {
    let db = AbiDatabase::default();
    let shape = Protocol::new(&db, "Shape".to_string(), vec!["area".to_string()]);
    let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
    let any_shape = CanonicalType::existential(&db, shape);
    let subs = bind(&db, &[(t, any_shape)]);

    let (func, ()) = build(&[types::I64], |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let mut src = Explosion::from_values(ExplosionKind::Minimal, args);
        let mut opened = session.unsubstitute(t, any_shape, &mut src).unwrap();
        let rebuilt = session.resubstitute(t, any_shape, &mut opened).unwrap();
        assert_eq!(rebuilt.len(), 1);
    });

    verify(&func);
    assert_eq!(count(&func, "stack_addr"), 1);
    assert_eq!(count(&func, "store"), 3);
}

#[test]
fn rebuilt_container_goes_to_provided_storage() {
    let db = AbiDatabase::default();
    let shape = Protocol::new(&db, "Shape".to_string(), vec!["area".to_string()]);
    let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
    let any_shape = CanonicalType::existential(&db, shape);
    let subs = bind(&db, &[(t, any_shape)]);

    let (func, ()) = build(&[types::I64, types::I64], |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let mut src = Explosion::from_values(ExplosionKind::Maximal, vec![args[0]]);
        let mut opened = session.unsubstitute(t, any_shape, &mut src).unwrap();
        session.set_container_storage(args[1], 8, 1);
        let rebuilt = session.resubstitute(t, any_shape, &mut opened).unwrap();
        assert_ne!(rebuilt.values()[0], args[1]);
    });

    verify(&func);
    assert_eq!(count(&func, "stack_addr"), 0);
    assert_eq!(count(&func, "iadd_imm"), 1);
    assert_eq!(count(&func, "store"), 3);
}

#[test]
fn container_storage_is_bounded() {
    let db = AbiDatabase::default();
    let shape = Protocol::new(&db, "Shape".to_string(), vec![]);
    let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
    let any_shape = CanonicalType::existential(&db, shape);
    let orig = CanonicalType::tuple(&db, vec![t, t]);
    let subst = CanonicalType::tuple(&db, vec![any_shape, any_shape]);
    let subs = bind(&db, &[(t, any_shape)]);

    let (_, err) = build(&[types::I64, types::I64, types::I64], |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args[..2].to_vec());
        let mut opened = session.unsubstitute(orig, subst, &mut src).unwrap();
        session.set_container_storage(args[2], 0, 1);
        session.resubstitute(orig, subst, &mut opened).unwrap_err()
    });

    assert!(matches!(err.kind(), CompilationErrorKind::CodegenError(_)));
}

#[test]
fn unchanged_archetype_without_binding_is_rejected() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let u = CanonicalType::archetype(&db, "U", false, vec![]);
    let i64_ty = CanonicalType::scalar(&db, ScalarType::I64);
    let orig = CanonicalType::tuple(&db, vec![t, u]);
    let subst = CanonicalType::tuple(&db, vec![t, i64_ty]);
    let subs = bind(&db, &[(u, i64_ty)]);

    let (_, (forward, backward)) = build(&[types::I64, types::I64], |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args.clone());
        let forward = session.unsubstitute(orig, subst, &mut src).unwrap_err();
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        let backward = session.resubstitute(orig, subst, &mut src).unwrap_err();
        (forward, backward)
    });

    for err in [forward, backward] {
        assert!(matches!(
            err.invariant(),
            Some(InvariantViolation::MissingSubstitution { .. })
        ));
    }
}

#[test]
fn resubstituting_unknown_existential_is_rejected() {
    let db = AbiDatabase::default();
    let shape = Protocol::new(&db, "Shape".to_string(), vec![]);
    let t = CanonicalType::archetype(&db, "T", false, vec![shape]);
    let any_shape = CanonicalType::existential(&db, shape);
    let subs = bind(&db, &[(t, any_shape)]);

    let (_, err) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        resubstitute(
            emitter,
            &db,
            &subs,
            ExistentialSubstitutionMap::new(),
            t,
            any_shape,
            &mut src,
        )
        .unwrap_err()
    });

    assert!(matches!(
        err.invariant(),
        Some(InvariantViolation::MissingExistential { .. })
    ));
}

#[test]
fn coinciding_handles_are_forwarded() {
    let db = AbiDatabase::default();
    let c = CanonicalType::archetype(&db, "C", true, vec![]);
    let object = CanonicalType::scalar(&db, ScalarType::Object);
    let subs = bind(&db, &[(c, object)]);

    let (func, (args, out)) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args.clone());
        let (out, _) = unsubstitute(emitter, &db, &subs, c, object, &mut src).unwrap();
        (args, out)
    });

    verify(&func);
    assert_eq!(out.values(), args.as_slice());
    assert_eq!(count(&func, "store"), 0);
}

#[test]
fn minimal_aggregate_with_same_layout_is_forwarded() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let u = CanonicalType::archetype(&db, "U", false, vec![]);
    let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
    let orig = CanonicalType::tuple(&db, vec![t, i32_ty]);
    let subst = CanonicalType::tuple(&db, vec![u, i32_ty]);
    let subs = bind(&db, &[(t, u)]);

    let (func, (args, out)) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Minimal, args.clone());
        let (out, _) = unsubstitute(emitter, &db, &subs, orig, subst, &mut src).unwrap();
        (args, out)
    });

    verify(&func);
    assert_eq!(out.values(), args.as_slice());
    assert_eq!(count(&func, "load"), 0);
}

#[test]
fn minimal_aggregate_is_repacked_when_layout_differs() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
    let f32_ty = CanonicalType::scalar(&db, ScalarType::F32);
    let orig = CanonicalType::tuple(&db, vec![t, i32_ty]);
    let subst = CanonicalType::tuple(&db, vec![f32_ty, i32_ty]);
    let subs = bind(&db, &[(t, f32_ty)]);

    let (func, (args, out)) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Minimal, args.clone());
        let (out, _) = unsubstitute(emitter, &db, &subs, orig, subst, &mut src).unwrap();
        (args, out)
    });

    verify(&func);
    assert_eq!(out.len(), 1);
    assert_ne!(out.values()[0], args[0]);
    // abstract copy and the box for the f32
    assert_eq!(count(&func, "stack_addr"), 2);
    // f32 into its box, the handle, the i32
    assert_eq!(count(&func, "store"), 3);
}

#[test]
fn memory_conversion_boxes_wide_fields() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let i64_ty = CanonicalType::scalar(&db, ScalarType::I64);
    let inner = CanonicalType::tuple(&db, vec![i64_ty, i64_ty]);
    let orig = CanonicalType::tuple(&db, vec![t, i64_ty, i64_ty]);
    let subst = CanonicalType::tuple(&db, vec![inner, i64_ty, i64_ty]);
    let subs = bind(&db, &[(t, inner)]);

    let (func, ()) = build(&[types::I64], |emitter, args| {
        let mut session = ReabstractionSession::new(emitter, &db, &subs);
        let abstract_addr = session.unsubstitute_address(orig, subst, args[0]).unwrap();
        let concrete_addr = session
            .resubstitute_address(orig, subst, abstract_addr)
            .unwrap();
        assert_ne!(abstract_addr, args[0]);
        assert_ne!(concrete_addr, abstract_addr);
    });

    verify(&func);
    assert_eq!(count(&func, "stack_addr"), 3);
}

#[test]
fn mistyped_source_is_rejected() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let i32_ty = CanonicalType::scalar(&db, ScalarType::I32);
    let subs = bind(&db, &[(t, i32_ty)]);

    let (_, err) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        unsubstitute(emitter, &db, &subs, t, i32_ty, &mut src).unwrap_err()
    });

    assert!(matches!(
        err.invariant(),
        Some(InvariantViolation::SchemaMismatch { index: 0, .. })
    ));
}

#[test]
fn short_source_is_rejected() {
    let db = AbiDatabase::default();
    let t = CanonicalType::archetype(&db, "T", false, vec![]);
    let i64_ty = CanonicalType::scalar(&db, ScalarType::I64);
    let pair = CanonicalType::tuple(&db, vec![i64_ty, i64_ty]);
    let subs = bind(&db, &[(t, pair)]);

    let (_, err) = build(&[types::I64], |emitter, args| {
        let mut src = Explosion::from_values(ExplosionKind::Maximal, args);
        unsubstitute(emitter, &db, &subs, t, pair, &mut src).unwrap_err()
    });

    assert!(matches!(
        err.invariant(),
        Some(InvariantViolation::ExplosionExhausted {
            requested: 2,
            remaining: 1
        })
    ));
}
