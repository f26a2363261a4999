use hostns_core::*;
use nix::errno::Errno;

#[test]
fn test_every_stage_has_a_category() {
    for stage in Stage::ALL {
        let err = Error::stage(stage, Errno::EPERM);
        assert_ne!(err.category(), ErrorCategory::Other);
        assert_eq!(err.failed_stage(), Some(stage));
    }
}

#[test]
fn test_categories_follow_stage_order() {
    let categories: Vec<_> = Stage::ALL
        .iter()
        .map(|s| ErrorCategory::for_stage(*s))
        .collect();

    assert_eq!(
        categories,
        vec![
            ErrorCategory::ResourceAcquisition,
            ErrorCategory::ResourceAcquisition,
            ErrorCategory::NamespaceJoin,
            ErrorCategory::MountTransition,
            ErrorCategory::MountTransition,
            ErrorCategory::MountTransition,
            ErrorCategory::FinalExecution,
            ErrorCategory::FinalExecution,
        ]
    );
}

#[test]
fn test_stage_serde() {
    let json = serde_json::to_string(&Stage::CreateMountRoot).unwrap();
    assert_eq!(json, "\"create-mount-root\"");

    let stage: Stage = serde_json::from_str("\"relocate-cwd\"").unwrap();
    assert_eq!(stage, Stage::RelocateCwd);
}

#[test]
fn test_invocation_preserves_non_utf8_arguments() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let raw = OsString::from_vec(vec![b'f', 0xff, b'o']);
    let inv = Invocation::new("enter-host-ns", [OsString::from("/bin/ls"), raw]).unwrap();

    assert_eq!(inv.argv()[1].as_bytes(), &[b'f', 0xff, b'o']);
}

#[test]
fn test_process_id_display() {
    assert_eq!(ProcessId::INIT.to_string(), "1");
}
