//! Pass 1: type shells, module references and resources.
//!
//! Only the shape of new types is created here. Members follow in the member merge, once
//! every type of every patch exists, so references between sibling types resolve no matter
//! the declaration order inside a patch.

use crate::{
    metadata::image::{Image, Resource, TypeId},
    patcher::{
        directives::{Directive, DirectiveSet},
        markers::{marker_attribute, Marker},
        names::{is_directive_namespace, split_type_name, target_type_name},
        MergeContext,
    },
    Result,
};

impl MergeContext<'_> {
    /// Runs the pre-patch pass for one patch image
    pub(crate) fn pre_patch_image(&mut self, patch: &Image) -> Result<()> {
        for &id in patch.top_level_types() {
            self.pre_patch_type(patch, id)?;
        }
        self.merge_module_refs(patch);
        self.merge_resources(patch);
        Ok(())
    }

    fn pre_patch_type(&mut self, patch: &Image, id: TypeId) -> Result<()> {
        let def = patch.type_def(id)?;
        let directives = DirectiveSet::parse(&def.custom_attributes);
        let name = target_type_name(patch, id)?;

        if (directives.has(Directive::Ignore) && !is_directive_namespace(&def.namespace))
            || self.config.is_skipped(&name)
        {
            verbose!(self.config, "[PrePatchType] Skipping {}", name);
            return Ok(());
        }

        let existing = self.output.find_type(&name);
        if directives.removes() {
            if let Some(existing) = existing {
                log::info!("[PrePatchType] Removing {} from the target module", name);
                self.output.remove_type(existing)?;
            }
            if directives.has(Directive::Remove) {
                return Ok(());
            }
        } else if existing.is_some() {
            return self.pre_patch_nested(patch, &def.nested);
        }

        let declaring = match def.declaring {
            Some(parent) => {
                let parent_name = target_type_name(patch, parent)?;
                let parent = self.output.find_type(&parent_name).ok_or_else(|| {
                    structural_error!("Enclosing type {} of {} is not in the output", parent_name, name)
                })?;
                Some(parent)
            }
            None => None,
        };

        let (namespace, simple) = split_type_name(&name);
        let mut shell = def.shell();
        shell.namespace = namespace.to_string();
        shell.name = simple.to_string();
        shell
            .custom_attributes
            .push(marker_attribute(self.output, Marker::Added)?);

        log::info!("[PrePatchType] Adding {} to the target module", name);
        self.output.add_type(shell, declaring)?;
        self.pre_patch_nested(patch, &def.nested)
    }

    fn pre_patch_nested(&mut self, patch: &Image, nested: &[TypeId]) -> Result<()> {
        for &id in nested {
            self.pre_patch_type(patch, id)?;
        }
        Ok(())
    }

    fn merge_module_refs(&mut self, patch: &Image) {
        for module in &patch.module_refs {
            if !self.output.module_refs.contains(module) {
                verbose!(self.config, "[PrePatch] Adding module reference {}", module);
                self.output.module_refs.push(module.clone());
            }
        }
    }

    /// Resources named after the patch assembly are renamed after the output assembly.
    /// A resource replaces an existing one of the same name.
    fn merge_resources(&mut self, patch: &Image) {
        for resource in &patch.resources {
            let name = match resource.name.strip_prefix(patch.identity.name.as_str()) {
                Some(rest) => format!("{}{}", self.output.identity.name, rest),
                None => resource.name.clone(),
            };
            verbose!(self.config, "[PrePatch] Adding resource {}", name);

            let merged = Resource {
                name,
                ..resource.clone()
            };
            match self.output.resources.iter_mut().find(|r| r.name == merged.name) {
                Some(existing) => *existing = merged,
                None => self.output.resources.push(merged),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::builder::TypeBuilder,
        patcher::{config::PatcherConfig, directives::HandlerRegistry},
        test::factories::{base_image, patch_builder},
    };

    fn pre_patch(output: &mut Image, patch: &Image, config: &PatcherConfig) {
        let handlers = HandlerRegistry::default();
        let mut context = MergeContext {
            output,
            config,
            handlers: &handlers,
        };
        context.pre_patch_image(patch).unwrap();
    }

    #[test]
    fn test_shells_for_new_and_nested_types() {
        let mut builder = patch_builder();
        let patch_a = builder.image_mut().find_type("Game.patch_A").unwrap();
        builder
            .add_nested(patch_a, TypeBuilder::nested("Inner"))
            .unwrap();
        builder.add_type(TypeBuilder::class("Game", "C")).unwrap();
        let patch = builder.build();

        let mut output = base_image();
        pre_patch(&mut output, &patch, &PatcherConfig::default());

        let c = output.find_type("Game.C").unwrap();
        let def = output.type_def(c).unwrap();
        assert!(def.methods.is_empty());
        assert!(Marker::Added.is_on(&def.custom_attributes));
        assert!(output.find_type("Game.A/Inner").is_some());
        assert!(output.find_type("Game.patch_A").is_none());
    }

    #[test]
    fn test_remove_ignore_and_skip() {
        let mut builder = patch_builder();
        builder
            .add_type(
                TypeBuilder::class("Game", "patch_B").custom_attribute(Directive::Remove.attribute()),
            )
            .unwrap();
        builder
            .add_type(
                TypeBuilder::class("Game", "Ignored").custom_attribute(Directive::Ignore.attribute()),
            )
            .unwrap();
        builder.add_type(TypeBuilder::class("Game", "Skipped")).unwrap();
        let patch = builder.build();

        let mut output = base_image();
        let config = PatcherConfig::default().skip("Game.Skipped");
        pre_patch(&mut output, &patch, &config);

        assert!(output.find_type("Game.B").is_none());
        assert!(output.find_type("Game.Ignored").is_none());
        assert!(output.find_type("Game.Skipped").is_none());
        assert!(output.find_type("Game.A").is_some());
    }

    #[test]
    fn test_resources_are_renamed_and_replaced() {
        let mut builder = patch_builder();
        builder
            .resource("Game.Mod.mm.Text.resources", b"new")
            .resource("Other.resources", b"other")
            .module_ref("native.dll");
        let patch = builder.build();

        let mut output = base_image();
        output.resources.push(Resource {
            name: "Game.Text.resources".to_string(),
            public: true,
            data: b"old".to_vec(),
        });
        pre_patch(&mut output, &patch, &PatcherConfig::default());
        pre_patch(&mut output, &patch, &PatcherConfig::default());

        let names: Vec<&str> = output.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Game.Text.resources", "Other.resources"]);
        assert_eq!(output.resources[0].data, b"new".to_vec());
        assert_eq!(output.module_refs, vec!["native.dll".to_string()]);
    }
}
