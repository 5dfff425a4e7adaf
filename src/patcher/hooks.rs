//! Caller extension points of a patch run.

use crate::{
    metadata::{body::MethodBody, image::Image, image::MethodDef},
    Result,
};

/// Callbacks invoked at fixed points of the pipeline.
///
/// Every method has an empty default, so an implementation only overrides what it needs.
/// Several hook sets may be installed on a [`crate::patcher::Patcher`]; they run in
/// installation order.
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::{metadata::image::MethodDef, PatchHooks, Result};
///
/// struct CountMethods(usize);
///
/// impl PatchHooks for CountMethods {
///     fn rewrite_method(&mut self, _method: &mut MethodDef) -> Result<()> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait PatchHooks {
    /// Called for every patch image right after it was added
    ///
    /// # Errors
    /// An error aborts the run.
    fn on_read_mod(&mut self, _image: &mut Image) -> Result<()> {
        Ok(())
    }

    /// Called once per output method while references are rewritten, before its
    /// instructions are fixed up
    ///
    /// # Errors
    /// An error aborts the run.
    fn rewrite_method(&mut self, _method: &mut MethodDef) -> Result<()> {
        Ok(())
    }

    /// Called once per instruction after its reference was rewritten
    ///
    /// # Errors
    /// An error aborts the run.
    fn rewrite_instruction(&mut self, _body: &mut MethodBody, _index: usize) -> Result<()> {
        Ok(())
    }

    /// Called last during post-processing
    ///
    /// # Errors
    /// An error aborts the run.
    fn post_process(&mut self, _output: &mut Image) -> Result<()> {
        Ok(())
    }
}
