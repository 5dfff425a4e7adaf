//! End-to-end patch runs over in-memory images.

use dotpatch::{
    loader::{MemorySink, MemorySource},
    metadata::{
        body::{OpCode, Operand},
        builder::{BodyBuilder, FieldBuilder, ImageBuilder, MethodBuilder, TypeBuilder},
        identity::{AssemblyIdentity, AssemblyVersion},
        image::Image,
        listing::{fingerprint, listing},
        members::{MemberReference, MethodRef, MethodSig},
        typesig::{NamedType, TypeSig},
        verify::{verify_references, DanglingReason},
    },
    patcher::{
        directives::Directive,
        markers::{recorded_original, Marker},
    },
    Error, Patcher, PatcherConfig,
};

const GAME_DIR: &str = "/game";

fn version() -> AssemblyVersion {
    AssemblyVersion::new(1, 0, 0, 0)
}

fn core_library() -> Image {
    let mut builder = ImageBuilder::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
    for name in ["Object", "ValueType", "Enum", "Attribute", "Int32"] {
        builder.add_type(TypeBuilder::class("System", name)).unwrap();
    }
    builder.build()
}

/// `Game` with `A { int count; A(); int Foo() => 1; int GetCount() => count; }`
fn game() -> Image {
    let mut builder = ImageBuilder::new("Game", version());
    let a = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
    builder.add_default_ctor(a).unwrap();
    let count = builder
        .add_field(a, FieldBuilder::new("count", TypeSig::int32()))
        .unwrap();
    let count = builder.field_ref(count).unwrap();
    builder
        .add_method(
            a,
            MethodBuilder::new("Foo")
                .returns(TypeSig::int32())
                .body(BodyBuilder::new().ldc_i4(1).ret()),
        )
        .unwrap();
    builder
        .add_method(
            a,
            MethodBuilder::new("GetCount")
                .returns(TypeSig::int32())
                .body(BodyBuilder::new().ldarg(0).ldfld(count).ret()),
        )
        .unwrap();
    builder.build()
}

fn patch_builder() -> ImageBuilder {
    let mut builder = ImageBuilder::new("Game.Mod.mm", version());
    builder.reference(AssemblyIdentity::new("Game", version()));
    builder
}

fn patch_type(builder: &mut ImageBuilder) -> dotpatch::metadata::image::TypeId {
    builder
        .add_type(TypeBuilder::class("Game", "patch_A").base(TypeSig::named("Game", "Game", "A")))
        .unwrap()
}

fn run(config: PatcherConfig, patch: Image) -> dotpatch::Result<Image> {
    let mut source = MemorySource::new();
    source.insert_in(GAME_DIR, core_library());
    let base = source.insert_in(GAME_DIR, game());

    let mut patcher = Patcher::new(config, Box::new(source));
    patcher.read(base)?;
    patcher.add_mod(patch)?;

    let mut sink = MemorySink::new();
    patcher.run(&mut sink)?;
    Ok(sink.last().cloned().unwrap())
}

fn method(image: &Image, type_name: &str, local_id: &str) -> dotpatch::metadata::image::MethodId {
    let owner = image.find_type(type_name).unwrap();
    image.find_method(owner, local_id).unwrap()
}

fn first_operand(image: &Image, type_name: &str, local_id: &str) -> Operand {
    let id = method(image, type_name, local_id);
    let body = image.method_def(id).unwrap().body.as_ref().unwrap();
    body.instructions[0].operand.clone()
}

/// `patch_A { int Foo() => 2; }`
fn overriding_patch() -> Image {
    let mut builder = patch_builder();
    let patch_a = patch_type(&mut builder);
    builder
        .add_method(
            patch_a,
            MethodBuilder::new("Foo")
                .returns(TypeSig::int32())
                .body(BodyBuilder::new().ldc_i4(2).ret()),
        )
        .unwrap();
    builder.build()
}

#[test]
fn test_overwritten_method_keeps_original() {
    let output = run(PatcherConfig::default(), overriding_patch()).unwrap();

    assert_eq!(first_operand(&output, "Game.A", "System.Int32 Foo()"), Operand::Int32(2));
    assert_eq!(
        first_operand(&output, "Game.A", "System.Int32 orig_Foo()"),
        Operand::Int32(1)
    );

    let foo = method(&output, "Game.A", "System.Int32 Foo()");
    let attributes = &output.method_def(foo).unwrap().custom_attributes;
    let markers = attributes
        .iter()
        .filter(|attribute| attribute.type_name() == Marker::OriginalName.type_name())
        .count();
    assert_eq!(markers, 1);
    assert_eq!(recorded_original(attributes), Some("orig_Foo"));

    let original = method(&output, "Game.A", "System.Int32 orig_Foo()");
    assert!(Marker::Original.is_on(&output.method_def(original).unwrap().custom_attributes));
}

#[test]
fn test_patch_calls_captured_original() {
    let mut builder = patch_builder();
    let patch_a = patch_type(&mut builder);
    let orig = MethodRef::new(
        builder.type_sig(patch_a).unwrap(),
        "orig_Foo",
        MethodSig::instance(TypeSig::int32(), vec![]),
    );
    builder
        .add_method(
            patch_a,
            MethodBuilder::new("Foo").returns(TypeSig::int32()).body(
                BodyBuilder::new()
                    .ldarg(0)
                    .call(orig)
                    .ldc_i4(1)
                    .add()
                    .ret(),
            ),
        )
        .unwrap();
    builder
        .add_method(patch_a, MethodBuilder::new("orig_Foo").returns(TypeSig::int32()))
        .unwrap();

    let output = run(PatcherConfig::default().strict(true), builder.build()).unwrap();
    let foo = method(&output, "Game.A", "System.Int32 Foo()");
    let body = output.method_def(foo).unwrap().body.as_ref().unwrap();
    let call = &body.instructions[1];
    assert_eq!(call.opcode, OpCode::Callvirt);

    let Operand::Reference(MemberReference::Method(target)) = &call.operand else {
        panic!("expected a method operand, found {:?}", call.operand);
    };
    assert_eq!(target.name, "orig_Foo");
    let declaring = target.declaring.definition().unwrap();
    assert_eq!(declaring.scope, "Game");
    assert_eq!(declaring.full_name(), "Game.A");
}

#[test]
fn test_new_type_base_resolves_into_output() {
    let mut builder = patch_builder();
    let patch_a = patch_type(&mut builder);
    let patch_a_sig = builder.type_sig(patch_a).unwrap();
    let c = builder
        .add_type(TypeBuilder::class("Game", "C").base(patch_a_sig))
        .unwrap();
    builder.add_default_ctor(c).unwrap();

    let output = run(PatcherConfig::default().strict(true), builder.build()).unwrap();
    let c = output.find_type("Game.C").unwrap();
    let def = output.type_def(c).unwrap();
    let base = def.base_type.as_ref().and_then(TypeSig::definition).unwrap();
    assert_eq!(base.scope, "Game");
    assert_eq!(base.full_name(), "Game.A");
    assert!(Marker::Added.is_on(&def.custom_attributes));
    assert!(!output.has_assembly_ref("Game.Mod.mm"));
}

fn removing_patch() -> Image {
    let mut builder = patch_builder();
    let patch_a = patch_type(&mut builder);
    builder
        .add_field(
            patch_a,
            FieldBuilder::new("count", TypeSig::int32())
                .custom_attribute(Directive::Remove.attribute()),
        )
        .unwrap();
    builder.build()
}

#[test]
fn test_removed_field_fails_strict_relink() {
    let result = run(PatcherConfig::default().strict(true), removing_patch());
    match result {
        Err(Error::RelinkFailed { source, .. }) => {
            assert!(matches!(*source, Error::RelinkTargetNotFound { .. }));
        }
        other => panic!("expected a relink failure, got {other:?}"),
    }
}

#[test]
fn test_removed_field_dangles_when_lenient() {
    let output = run(PatcherConfig::default(), removing_patch()).unwrap();
    let a = output.find_type("Game.A").unwrap();
    assert!(output.find_field(a, "count").is_none());

    let dangling = verify_references(&output).unwrap();
    assert!(dangling
        .iter()
        .any(|d| d.reason == DanglingReason::MissingDefinition && d.reference.contains("count")));
}

#[test]
fn test_patched_output_has_no_dangling_references() {
    let output = run(PatcherConfig::default().strict(true), overriding_patch()).unwrap();
    let dangling = verify_references(&output).unwrap();
    assert!(dangling.is_empty(), "dangling references: {dangling:?}");
}

#[test]
fn test_cleanup_is_idempotent_after_run() {
    let mut source = MemorySource::new();
    source.insert_in(GAME_DIR, core_library());
    let base = source.insert_in(GAME_DIR, game());

    let mut patcher = Patcher::new(PatcherConfig::default(), Box::new(source));
    patcher.read(base).unwrap();
    patcher.add_mod(overriding_patch()).unwrap();
    patcher.auto_patch().unwrap();

    let once = listing(patcher.output().unwrap()).unwrap();
    patcher.cleanup(false).unwrap();
    assert_eq!(listing(patcher.output().unwrap()).unwrap(), once);
}

#[test]
fn test_runs_are_deterministic() {
    let first = run(PatcherConfig::default(), overriding_patch()).unwrap();
    let second = run(PatcherConfig::default(), overriding_patch()).unwrap();
    assert_eq!(fingerprint(&first).unwrap(), fingerprint(&second).unwrap());
}

#[test]
fn test_link_to_wins_over_rename() {
    let mut builder = patch_builder();
    let patch_a = patch_type(&mut builder);
    let proxy = builder
        .add_method(
            patch_a,
            MethodBuilder::new("Proxy")
                .returns(TypeSig::int32())
                .custom_attribute(Directive::Name.attribute_with(&["Bar"]))
                .custom_attribute(Directive::LinkTo.attribute_with(&["Game.A", "Foo"]))
                .body(BodyBuilder::new().ldc_i4(3).ret()),
        )
        .unwrap();
    let proxy = builder.method_ref(proxy).unwrap();
    builder
        .add_method(
            patch_a,
            MethodBuilder::new("Caller")
                .returns(TypeSig::int32())
                .body(BodyBuilder::new().ldarg(0).call(proxy).ret()),
        )
        .unwrap();

    let output = run(PatcherConfig::default().strict(true), builder.build()).unwrap();
    let a = output.find_type("Game.A").unwrap();
    assert!(output.find_method(a, "System.Int32 Bar()").is_some());

    let caller = method(&output, "Game.A", "System.Int32 Caller()");
    let body = output.method_def(caller).unwrap().body.as_ref().unwrap();
    let Operand::Reference(MemberReference::Method(target)) = &body.instructions[1].operand else {
        panic!("expected a method operand");
    };
    assert_eq!(target.name, "Foo");
}

#[test]
fn test_was_here_marks_output() {
    let output = run(PatcherConfig::default(), overriding_patch()).unwrap();
    assert!(output.find_type(dotpatch::patcher::WAS_HERE).is_some());
}

/// `Root { virtual void Update(); }`, `Mid : Root`, `C : Mid { override void Update() => base.Update(); }`,
/// `G<T> { virtual void Update(); }` and `D : G<int> { override void Update() => base.Update(); }`
fn hierarchy() -> Image {
    let update = || MethodSig::instance(TypeSig::void(), vec![]);
    let mut builder = ImageBuilder::new("Game", version());
    let root = builder.add_type(TypeBuilder::class("Game", "Root")).unwrap();
    builder
        .add_method(
            root,
            MethodBuilder::new("Update").virtual_().body(BodyBuilder::new().ret()),
        )
        .unwrap();
    let root_sig = builder.type_sig(root).unwrap();
    let mid = builder
        .add_type(TypeBuilder::class("Game", "Mid").base(root_sig.clone()))
        .unwrap();
    let mid_sig = builder.type_sig(mid).unwrap();
    let c = builder
        .add_type(TypeBuilder::class("Game", "C").base(mid_sig))
        .unwrap();
    builder
        .add_method(
            c,
            MethodBuilder::new("Update").virtual_().body(
                BodyBuilder::new()
                    .ldarg(0)
                    .call(MethodRef::new(root_sig, "Update", update()))
                    .ret(),
            ),
        )
        .unwrap();

    let generic = builder
        .add_type(TypeBuilder::class("Game", "G`1").generic_param("T"))
        .unwrap();
    builder
        .add_method(
            generic,
            MethodBuilder::new("Update").virtual_().body(BodyBuilder::new().ret()),
        )
        .unwrap();
    let instance = TypeSig::GenericInstance {
        definition: NamedType::new("Game", "Game", "G`1"),
        args: vec![TypeSig::int32()],
    };
    let d = builder
        .add_type(TypeBuilder::class("Game", "D").base(instance.clone()))
        .unwrap();
    builder
        .add_method(
            d,
            MethodBuilder::new("Update").virtual_().body(
                BodyBuilder::new()
                    .ldarg(0)
                    .call(MethodRef::new(instance, "Update", update()))
                    .ret(),
            ),
        )
        .unwrap();
    builder.build()
}

#[test]
fn test_base_calls_through_the_hierarchy_stay_non_virtual() {
    let mut source = MemorySource::new();
    source.insert_in(GAME_DIR, core_library());
    let base = source.insert_in(GAME_DIR, hierarchy());

    let mut patcher = Patcher::new(PatcherConfig::default(), Box::new(source));
    patcher.read(base).unwrap();
    patcher.add_mod(patch_builder().build()).unwrap();
    patcher.auto_patch().unwrap();

    let output = patcher.output().unwrap();
    for owner in ["Game.C", "Game.D"] {
        let update = method(output, owner, "System.Void Update()");
        let body = output.method_def(update).unwrap().body.as_ref().unwrap();
        assert_eq!(body.instructions[1].opcode, OpCode::Call, "base call in {owner}");
    }
}
