//! Benchmarks for relinking.
//!
//! Measures:
//! - Relink map lookups through the resolver, with and without its cache
//! - A full patch run over a generated base image and a patch overriding every method

extern crate dotpatch;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotpatch::{
    loader::{MemorySink, MemorySource},
    metadata::{
        builder::{BodyBuilder, ImageBuilder, MethodBuilder, TypeBuilder},
        identity::{AssemblyIdentity, AssemblyVersion},
        image::Image,
        members::MemberReference,
        typesig::TypeSig,
    },
    relink::{RelinkMap, RelinkTarget, ResolveScope, Resolver},
    Patcher, PatcherConfig,
};
use std::hint::black_box;

const TYPES: usize = 200;
const METHODS: usize = 10;

fn version() -> AssemblyVersion {
    AssemblyVersion::new(1, 0, 0, 0)
}

fn core_library() -> Image {
    let mut builder = ImageBuilder::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
    builder.add_type(TypeBuilder::class("System", "Object")).unwrap();
    builder.build()
}

/// `Game` with `TYPES` classes of `METHODS` methods each
fn game() -> Image {
    let mut builder = ImageBuilder::new("Game", version());
    for t in 0..TYPES {
        let id = builder
            .add_type(TypeBuilder::class("Game", &format!("T{t}")))
            .unwrap();
        builder.add_default_ctor(id).unwrap();
        for m in 0..METHODS {
            builder
                .add_method(
                    id,
                    MethodBuilder::new(&format!("M{m}"))
                        .returns(TypeSig::int32())
                        .body(BodyBuilder::new().ldc_i4(m as i32).ret()),
                )
                .unwrap();
        }
    }
    builder.build()
}

/// A patch overriding every method of [`game`]
fn patch() -> Image {
    let mut builder = ImageBuilder::new("Game.Mod.mm", version());
    builder.reference(AssemblyIdentity::new("Game", version()));
    for t in 0..TYPES {
        let id = builder
            .add_type(
                TypeBuilder::class("Game", &format!("patch_T{t}"))
                    .base(TypeSig::named("Game", "Game", format!("T{t}"))),
            )
            .unwrap();
        for m in 0..METHODS {
            builder
                .add_method(
                    id,
                    MethodBuilder::new(&format!("M{m}"))
                        .returns(TypeSig::int32())
                        .body(BodyBuilder::new().ldc_i4(-(m as i32)).ret()),
                )
                .unwrap();
        }
    }
    builder.build()
}

fn bench_resolver_lookup(c: &mut Criterion) {
    let output = game();
    let mut map = RelinkMap::new();
    for t in 0..TYPES {
        map.insert(format!("Game.Old{t}"), RelinkTarget::TypeName(format!("Game.T{t}")));
    }
    let references: Vec<MemberReference> = (0..TYPES)
        .map(|t| MemberReference::Type(TypeSig::named("Game", "Game", format!("Old{t}"))))
        .collect();

    for (name, use_cache) in [("relink_lookup_cached", true), ("relink_lookup_uncached", false)] {
        let mut resolver = Resolver::new(map.clone());
        resolver.use_cache = use_cache;
        let scope = ResolveScope::output_only(&output);
        c.bench_function(name, |b| {
            b.iter(|| {
                for reference in &references {
                    let resolution = resolver
                        .resolve(black_box(reference), &scope, true, true)
                        .unwrap();
                    black_box(resolution);
                }
            });
        });
    }
}

fn bench_auto_patch(c: &mut Criterion) {
    let mut source = MemorySource::new();
    source.insert_in("/game", core_library());
    let base = source.insert_in("/game", game());
    let patch = patch();

    c.bench_function("auto_patch_200_types", |b| {
        b.iter_batched(
            || {
                let mut patcher =
                    Patcher::new(PatcherConfig::default(), Box::new(source.clone()));
                patcher.read(&base).unwrap();
                patcher.add_mod(patch.clone()).unwrap();
                patcher
            },
            |mut patcher| {
                let mut sink = MemorySink::new();
                patcher.run(&mut sink).unwrap();
                black_box(sink)
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_resolver_lookup, bench_auto_patch);
criterion_main!(benches);
