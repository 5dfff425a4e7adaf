//! Pass 4: removal of patch-only artifacts.
//!
//! Running the cleanup a second time finds nothing left to remove.

use crate::{
    loader::PATCH_ASSEMBLY_SUFFIX,
    metadata::{attributes::CustomAttribute, builder::CORE_LIBRARY, image::Image},
    patcher::{
        config::PatcherConfig,
        directives::{is_directive_attribute, DIRECTIVE_PREFIX},
        names::is_directive_namespace,
    },
    Result,
};

/// Returns true for attributes whose type lives in the directive namespace
fn is_pipeline_attribute(type_name: &str) -> bool {
    type_name
        .rsplit_once('.')
        .is_some_and(|(namespace, _)| is_directive_namespace(namespace))
}

/// Strips directive attributes and types from `output`.
///
/// With `all`, provenance markers and the directive library reference go as well. Patch image
/// references and duplicate core library references are dropped as configured.
///
/// # Errors
/// Returns an error if the image holds a stale handle.
pub(crate) fn cleanup(output: &mut Image, config: &PatcherConfig, all: bool) -> Result<()> {
    log::info!("[Cleanup] Cleaning up {} (all: {})", output.identity.name, all);

    let mut removed = 0usize;
    for &id in &output.top_level_types().to_vec() {
        let name = output.type_full_name(id)?;
        let namespace = output.type_def(id)?.namespace.clone();
        if name.starts_with(DIRECTIVE_PREFIX) || (all && is_directive_namespace(&namespace)) {
            verbose!(config, "[Cleanup] Removing type {}", name);
            output.remove_type(id)?;
            removed += 1;
        }
    }

    let strip = |attribute: &CustomAttribute| {
        is_directive_attribute(attribute) || (all && is_pipeline_attribute(&attribute.type_name()))
    };
    output.custom_attributes.retain(|attribute| !strip(attribute));
    for declaration in output.declarations() {
        let attributes = output.custom_attributes_mut(declaration)?;
        let before = attributes.len();
        attributes.retain(|attribute| !strip(attribute));
        removed += before - attributes.len();
    }

    let own = output.scope_name().to_string();
    output.assembly_refs.retain(|reference| {
        let directive = all && is_directive_namespace(&reference.name);
        let patch = config.remove_patch_references && reference.name.ends_with(PATCH_ASSEMBLY_SUFFIX);
        !(directive || patch || reference.name == own)
    });

    if config.dedupe_core_library {
        dedupe_core_library(output);
    }

    let live: Vec<String> = output.assembly_refs.iter().map(|r| r.name.clone()).collect();
    let mut dangling = Vec::new();
    for entry in output.references.iter() {
        let mut keep = true;
        for sig in entry.reference.type_sigs() {
            sig.for_each_named(&mut |named| {
                let local = named.scope == own;
                if (local && output.find_type(&named.full_name()).is_none())
                    || (!local && !live.contains(&named.scope))
                {
                    keep = false;
                }
            });
        }
        if !keep {
            dangling.push(entry.token);
        }
    }
    if !dangling.is_empty() {
        verbose!(config, "[Cleanup] Dropping {} stale references", dangling.len());
        output.references.retain(|entry| !dangling.contains(&entry.token));
    }

    log::info!("[Cleanup] Removed {} declarations and attributes", removed);
    Ok(())
}

/// Keeps only the highest version among core library references
fn dedupe_core_library(output: &mut Image) {
    let Some(highest) = output
        .assembly_refs
        .iter()
        .filter(|reference| reference.name == CORE_LIBRARY)
        .map(|reference| reference.version)
        .max()
    else {
        return;
    };

    let mut kept = false;
    output.assembly_refs.retain(|reference| {
        if reference.name != CORE_LIBRARY {
            return true;
        }
        if reference.version == highest && !kept {
            kept = true;
            return true;
        }
        log::debug!("[Cleanup] Dropping duplicate core library reference {}", reference);
        false
    });
}
