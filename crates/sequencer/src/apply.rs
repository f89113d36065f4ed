use render_protocol::{
    CameraTileSettings, ConfigurationError, LensUnit, RenderTileDescriptor, SceneSettings,
    TileRenderSettings,
};

/// Rewrites the scene so the next render produces exactly `tile`.
///
/// Only fields the tile needs are touched; everything else keeps the values
/// captured in the job's `SavedSettings`. Split tiles describe persistent
/// cameras and cannot be applied.
pub(crate) fn apply_tile<S: SceneSettings + ?Sized>(
    scene: &mut S,
    tile: &RenderTileDescriptor,
) -> Result<(), ConfigurationError> {
    let mut config = scene.render_config();
    config.output_file_path = tile.output_path.clone();
    config.image_format = tile.image_format.clone();
    config.resolution_scale_percent = 100;

    match &tile.settings {
        TileRenderSettings::CameraShift { camera } => {
            config.resolution_x = tile.tile_x;
            config.resolution_y = tile.tile_y;
            apply_camera(scene, camera)?;
        }
        TileRenderSettings::RenderBorder { border } => {
            config.use_border = true;
            config.use_crop_to_border = true;
            config.border = *border;
        }
        TileRenderSettings::CameraSplit { .. } => {
            return Err(ConfigurationError::MethodNotRenderable {
                method: tile.settings.method(),
            });
        }
    }

    scene.set_render_config(&config);
    Ok(())
}

fn apply_camera<S: SceneSettings + ?Sized>(
    scene: &mut S,
    settings: &CameraTileSettings,
) -> Result<(), ConfigurationError> {
    let mut camera = scene
        .active_camera()
        .ok_or(ConfigurationError::NoActiveCamera)?;
    camera.lens_unit = LensUnit::Millimeters;
    camera.focal_length = settings.focal_length;
    camera.aperture_fstop = settings.aperture_fstop;
    camera.shift_x = settings.shift_x;
    camera.shift_y = settings.shift_y;
    scene.set_active_camera(&camera);
    Ok(())
}
