//! §8 scenario S1: "Single-process primary only. 1 process, 100×100 image,
//! a single camera, an opaque sphere. After Start/Render/Wait,
//! pixels_received == 10000, all rays have terminated, local_raylist_count
//! == 0." `NullTracer` stands in for the sphere intersector (§1 "opaque
//! predicates" are out of scope here).

use std::sync::Arc;

use gxy_app::{Application, NullTracer};
use gxy_config::GxyConfig;
use gxy_keyed::KeyedObject;
use gxy_partition::{Subbox, Vec3};
use gxy_render::{RayList, RayPriority, RayType, Renderer, RenderingSet};

const IMAGE_SIZE: u32 = 100;

#[test]
fn single_process_primary_rays_all_terminate() {
    let config = GxyConfig::load(None, false).expect("default config");
    let mut apps = Application::launch(1, config).expect("launch a 1-rank cluster");
    let app = apps.pop().expect("one rank");

    let rendering_set_key = app.keyed_objects().allocate_key();
    let rendering_key = 1;
    let rendering = gxy_render::Rendering::new(rendering_key, /* camera */ 1, /* visualization */ 1, app.rank());
    let rs = Arc::new(RenderingSet::new(
        rendering_set_key,
        /* class_id */ 0,
        vec![rendering],
        app.work_ids().rendering_set,
    ));
    app.keyed_objects().insert(rs.clone());
    assert!(rs.local_commit(app.transport().as_ref()));

    let renderer = Arc::new(Renderer::new(
        IMAGE_SIZE as usize * IMAGE_SIZE as usize,
        false,
        app.work_ids().renderer,
        app.ray_queue().clone(),
    ));
    let partitioning = Arc::new(
        gxy_partition::Partitioning::new(1, 0, Subbox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0)))
            .expect("single-rank partitioning always succeeds"),
    );
    app.spawn_ray_worker(Arc::new(NullTracer), renderer, partitioning)
        .expect("spawn the ray-queue worker");

    rs.camera_pass_begin(app.transport().as_ref());

    let mut primary = RayList::new(rendering_set_key, rendering_key, rs.current_frame());
    let mut ray_id = 0u64;
    for y in 0..IMAGE_SIZE {
        for x in 0..IMAGE_SIZE {
            primary.push(
                RayType::Primary,
                [0.0, 0.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 1.0, 1.0, 1.0],
                0.0,
                (x, y),
                ray_id,
            );
            ray_id += 1;
        }
    }
    rs.increment_raylist_count(app.transport().as_ref());
    app.enqueue_rays(RayPriority::Primary, primary);
    rs.camera_pass_end(app.transport().as_ref());

    rs.wait_for_done();

    assert_eq!(rs.local_raylist_count(), 0);
    assert_eq!(rs.renderings()[0].framebuffer().len(), (IMAGE_SIZE * IMAGE_SIZE) as usize);
    let (sent, received) = rs.pixel_counts();
    assert_eq!(sent, (IMAGE_SIZE * IMAGE_SIZE) as u64);
    assert_eq!(received, (IMAGE_SIZE * IMAGE_SIZE) as u64);

    app.quit_application();
}
