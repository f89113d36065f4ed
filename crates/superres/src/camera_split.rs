use std::path::PathBuf;

use render_protocol::{
    CameraRig, CameraRigError, CameraState, ConfigurationError, ImageFormat, LensUnit, Notifier,
    SavedSettings, Severity, SubdivisionLevel, TileRenderSettings, TilingMethod,
};
use tiles::{TileJob, plan_render_tiles};

const NOTIFICATION_TITLE: &str = "Split Camera";

#[derive(Debug, thiserror::Error)]
pub enum SplitCameraError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    CameraRig(#[from] CameraRigError),
}

/// Replaces the active camera's view with one persistent camera per tile.
///
/// The cameras are added to a new group named `<camera>_Split`. Returns the
/// names of the created cameras in row-major order.
pub fn split_active_camera<R, N>(
    rig: &mut R,
    notifier: &N,
    level: SubdivisionLevel,
) -> Result<Vec<String>, SplitCameraError>
where
    R: CameraRig + ?Sized,
    N: Notifier + ?Sized,
{
    let saved = SavedSettings::capture(&*rig)?;
    let job = TileJob {
        resolution: saved.render_config().resolution()?,
        level,
        method: TilingMethod::CameraSplit,
        tile_format: ImageFormat::OpenExr,
        output_dir: PathBuf::new(),
    };
    let tiles = plan_render_tiles(&job, &saved)?;

    let group = format!("{}_Split", saved.camera().name);
    rig.create_camera_group(&group)?;

    let mut names = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let TileRenderSettings::CameraSplit {
            camera_name,
            camera,
        } = tile.settings
        else {
            continue;
        };
        rig.add_camera_to_group(
            &group,
            CameraState {
                name: camera_name.clone(),
                focal_length: camera.focal_length,
                aperture_fstop: camera.aperture_fstop,
                shift_x: camera.shift_x,
                shift_y: camera.shift_y,
                lens_unit: LensUnit::Millimeters,
            },
        )?;
        names.push(camera_name);
    }

    log::info!("split {} into {} cameras in {group}", saved.camera().name, names.len());
    notifier.notify(
        &format!(
            "Selected camera has been split into {} new cameras",
            names.len()
        ),
        NOTIFICATION_TITLE,
        Severity::Info,
    );
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use render_protocol::{BorderRect, RenderConfig};

    use super::*;
    use crate::scene::SceneDescription;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: RefCell<Vec<(String, String, Severity)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str, title: &str, severity: Severity) {
            self.messages
                .borrow_mut()
                .push((message.to_owned(), title.to_owned(), severity));
        }
    }

    fn scene(camera: Option<CameraState>) -> SceneDescription {
        SceneDescription::new(
            camera,
            RenderConfig {
                output_file_path: PathBuf::from("render"),
                image_format: ImageFormat::Png,
                resolution_scale_percent: 100,
                resolution_x: 1920,
                resolution_y: 1080,
                use_border: false,
                use_crop_to_border: false,
                border: BorderRect::FULL,
            },
        )
    }

    fn camera() -> CameraState {
        CameraState {
            name: "Camera".to_owned(),
            focal_length: 50.0,
            aperture_fstop: 2.8,
            shift_x: 0.0,
            shift_y: 0.0,
            lens_unit: LensUnit::FieldOfView,
        }
    }

    #[test]
    fn split_creates_one_camera_per_tile() {
        let mut scene = scene(Some(camera()));
        let notifier = RecordingNotifier::default();
        let level = SubdivisionLevel::new(1).expect("level");

        let names = split_active_camera(&mut scene, &notifier, level).expect("split");
        assert_eq!(
            names,
            ["Camera_R01_C01", "Camera_R01_C02", "Camera_R02_C01", "Camera_R02_C02"]
        );

        let group = scene.camera_group("Camera_Split").expect("group created");
        assert_eq!(group.cameras.len(), 4);
        let first = &group.cameras[0];
        assert_eq!(first.lens_unit, LensUnit::Millimeters);
        assert!((first.focal_length - 100.0).abs() < 1e-9);
        assert!((first.aperture_fstop - 5.6).abs() < 1e-9);
        assert!((first.shift_x + 0.5).abs() < 1e-9);
        assert!((first.shift_y - 0.28125).abs() < 1e-9);

        // The active camera itself is left untouched.
        assert_eq!(scene.active_camera, Some(camera()));
        assert_eq!(
            notifier.messages.borrow().as_slice(),
            [(
                "Selected camera has been split into 4 new cameras".to_owned(),
                NOTIFICATION_TITLE.to_owned(),
                Severity::Info
            )]
        );
    }

    #[test]
    fn split_requires_active_camera() {
        let mut scene = scene(None);
        let notifier = RecordingNotifier::default();
        let error = split_active_camera(&mut scene, &notifier, SubdivisionLevel::default())
            .expect_err("no camera to split");
        assert!(matches!(
            error,
            SplitCameraError::Configuration(ConfigurationError::NoActiveCamera)
        ));
        assert!(scene.camera_groups.is_empty());
        assert!(notifier.messages.borrow().is_empty());
    }

    #[test]
    fn splitting_twice_reports_existing_group() {
        let mut scene = scene(Some(camera()));
        let notifier = RecordingNotifier::default();
        let level = SubdivisionLevel::new(1).expect("level");
        split_active_camera(&mut scene, &notifier, level).expect("first split");
        let error = split_active_camera(&mut scene, &notifier, level).expect_err("group exists");
        assert!(matches!(
            error,
            SplitCameraError::CameraRig(CameraRigError::GroupExists { .. })
        ));
    }
}
