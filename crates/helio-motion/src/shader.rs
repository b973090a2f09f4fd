//! Shader program registry
//!
//! Passes look programs up by name during setup. An unknown name is fatal:
//! a pass never runs without a valid program.

use crate::{Error, Result};
use std::collections::HashMap;

/// Full-screen camera reprojection program
pub const CAMERA_MOTION_SHADER: &str = "helio/motion/camera_motion";
/// Per-object previous-vs-current transform program
pub const OBJECT_MOTION_SHADER: &str = "helio/motion/object_motion";
/// Directional blur, one sub-pass per quality level
pub const MOTION_BLUR_SHADER: &str = "helio/motion/motion_blur";

/// Opaque handle to a resolved program
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ShaderProgram(pub u32);

/// Resolves program names to executable programs
pub trait ShaderRegistry {
    fn find(&self, name: &str) -> Option<ShaderProgram>;

    /// Like [`find`](Self::find) but unknown names are an error
    fn resolve(&self, name: &str) -> Result<ShaderProgram> {
        self.find(name)
            .ok_or_else(|| Error::Shader(format!("Shader '{}' not found", name)))
    }
}

/// Name-keyed program table
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    programs: HashMap<String, ShaderProgram>,
    names: Vec<String>,
}

impl ShaderLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with the camera motion, object motion and motion blur programs
    pub fn with_builtin() -> Self {
        let mut library = Self::new();
        library.register(CAMERA_MOTION_SHADER);
        library.register(OBJECT_MOTION_SHADER);
        library.register(MOTION_BLUR_SHADER);
        library
    }

    /// Register a program name, returning its handle (existing names keep theirs)
    pub fn register(&mut self, name: &str) -> ShaderProgram {
        if let Some(program) = self.programs.get(name) {
            return *program;
        }
        let program = ShaderProgram(self.names.len() as u32);
        self.names.push(name.to_string());
        self.programs.insert(name.to_string(), program);
        log::debug!("Registered shader program '{}' as {:?}", name, program);
        program
    }

    /// Name a handle was registered under
    pub fn name_of(&self, program: ShaderProgram) -> Option<&str> {
        self.names.get(program.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl ShaderRegistry for ShaderLibrary {
    fn find(&self, name: &str) -> Option<ShaderProgram> {
        self.programs.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_programs_resolve() {
        let library = ShaderLibrary::with_builtin();
        for name in [CAMERA_MOTION_SHADER, OBJECT_MOTION_SHADER, MOTION_BLUR_SHADER] {
            let program = library.resolve(name).unwrap();
            assert_eq!(library.name_of(program), Some(name));
        }
    }

    #[test]
    fn unknown_program_is_a_shader_error() {
        let library = ShaderLibrary::new();
        assert!(matches!(library.resolve("missing"), Err(Error::Shader(_))));
    }

    #[test]
    fn registering_twice_keeps_the_handle() {
        let mut library = ShaderLibrary::new();
        let a = library.register("a");
        assert_eq!(library.register("a"), a);
        assert_eq!(library.len(), 1);
    }
}
