/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//!
//! The paths module for quarry.
//!
//! Introduces 'ForwardRelativePath', 'ForwardRelativePathBuf', 'AbsNormPath',
//! and 'AbsNormPathBuf', which are equivalents of 'Path' and 'PathBuf'.
//!
//! ForwardRelativePaths are fully normalized relative platform agnostic paths
//! that only point forward. This means that there is no `.` or `..` in this
//! path, and it does not begin with `/`. These are resolved to a 'PathBuf' by
//! resolving them against an 'AbsNormPath'.
//!
//! 'AbsNormPath' are normalized absolute paths, meaning they must start with
//! a directory root and contain no `.` or `..` components.
//!

mod abs_norm_path;
mod forward_rel_path;

pub use abs_norm_path::AbsNormPath;
pub use abs_norm_path::AbsNormPathBuf;
pub use forward_rel_path::ForwardRelativePath;
pub use forward_rel_path::ForwardRelativePathBuf;
/// 'RelativePath' and 'RelativePathBuf' types are OS platform agnostic paths
/// that always have `/` separators.
pub use relative_path::RelativePath;
pub use relative_path::RelativePathBuf;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::fs::paths::ForwardRelativePath;
    use crate::fs::paths::ForwardRelativePathBuf;

    #[test]
    fn wrapped_paths_work_in_maps() -> anyhow::Result<()> {
        let mut map = HashMap::new();

        let p1 = ForwardRelativePath::new("foo")?;
        let p2 = ForwardRelativePath::new("bar")?;

        map.insert(p1.to_buf(), p2.to_buf());

        assert_eq!(Some(p2), map.get(p1).map(|p| p.as_ref()));

        Ok(())
    }

    #[test]
    fn relative_path_display_is_readable() -> anyhow::Result<()> {
        let buf = ForwardRelativePathBuf::unchecked_new("foo/bar".to_owned());
        assert_eq!("foo/bar", format!("{}", buf));
        let refpath: &ForwardRelativePath = &buf;
        assert_eq!("foo/bar", format!("{}", refpath));

        Ok(())
    }
}
