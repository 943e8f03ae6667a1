use async_trait::async_trait;
use scene_proto::{ActionKind, Invocation};
use serde_json::{json, Value};

use super::{decorate_result, interpret_script_result, Strategy, StrategyVerdict};
use crate::error::SurfaceError;
use crate::surface::RemoteSurface;

/// Runs a fixed page script. The script sees `args.params` (decoded
/// parameters), `args.target`, `args.action` and `args.strategy`.
#[derive(Debug, Clone)]
pub struct ScriptStrategy {
    name: &'static str,
    script: &'static str,
}

impl ScriptStrategy {
    pub const fn new(name: &'static str, script: &'static str) -> Self {
        Self { name, script }
    }

    pub fn script(&self) -> &str {
        self.script
    }
}

#[async_trait]
impl Strategy for ScriptStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(
        &self,
        invocation: &Invocation,
        surface: &dyn RemoteSurface,
    ) -> Result<StrategyVerdict, SurfaceError> {
        let args = json!({
            "strategy": self.name,
            "action": invocation.action.as_str(),
            "target": invocation.target,
            "params": Value::Object(invocation.params.to_map()),
        });
        let raw = surface.run(self.script, args).await?;
        Ok(match interpret_script_result(raw) {
            StrategyVerdict::Succeeded(result) => {
                StrategyVerdict::Succeeded(decorate_result(invocation, result))
            }
            rejected => rejected,
        })
    }
}

pub(super) fn standard_for(kind: ActionKind) -> Vec<ScriptStrategy> {
    match kind {
        ActionKind::Rotate => vec![
            ScriptStrategy::new("page.rotateModel", ROTATE_GLOBAL),
            ScriptStrategy::new("controls.orbit", ROTATE_CONTROLS),
            ScriptStrategy::new("camera.orbit", ROTATE_CAMERA),
        ],
        ActionKind::Zoom => vec![
            ScriptStrategy::new("page.zoomModel", ZOOM_GLOBAL),
            ScriptStrategy::new("controls.dolly", ZOOM_CONTROLS),
            ScriptStrategy::new("camera.dolly", ZOOM_CAMERA),
        ],
        ActionKind::Focus => vec![
            ScriptStrategy::new("region.click", FOCUS_REGION),
            ScriptStrategy::new("page.focusOnModel", FOCUS_GLOBAL),
            ScriptStrategy::new("scene.frameObject", FOCUS_SCENE),
        ],
        ActionKind::Reset => vec![
            ScriptStrategy::new("page.resetModel", RESET_GLOBAL),
            ScriptStrategy::new("controls.reset", RESET_CONTROLS),
            ScriptStrategy::new("camera.restore", RESET_CAMERA),
        ],
        ActionKind::Highlight => vec![
            ScriptStrategy::new("page.highlightComponent", HIGHLIGHT_GLOBAL),
            ScriptStrategy::new("scene.tintMaterial", HIGHLIGHT_SCENE),
        ],
        ActionKind::Custom => vec![ScriptStrategy::new("page.dispatch", CUSTOM_DISPATCH)],
    }
}

const ROTATE_GLOBAL: &str = r#"
if (typeof window.rotateModel !== 'function') {
  return { success: false, error: 'window.rotateModel is not defined' };
}
const out = await window.rotateModel(args.params);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;

const ROTATE_CONTROLS: &str = r#"
const controls = window.controls;
if (!controls) return { success: false, error: 'no orbit controls on page' };
const method = { left: 'rotateLeft', right: 'rotateRight', up: 'rotateUp', down: 'rotateDown' }[args.params.direction];
if (typeof controls[method] !== 'function') {
  return { success: false, error: `controls.${method} is not available` };
}
controls[method](args.params.angle * Math.PI / 180);
if (typeof controls.update === 'function') controls.update();
return { success: true };
"#;

const ROTATE_CAMERA: &str = r#"
const camera = window.camera;
const THREE = window.THREE;
if (!camera || !THREE) return { success: false, error: 'camera or THREE missing' };
const dir = args.params.direction;
const axis = (dir === 'left' || dir === 'right') ? new THREE.Vector3(0, 1, 0) : new THREE.Vector3(1, 0, 0);
const sign = (dir === 'left' || dir === 'up') ? 1 : -1;
const pivot = (window.controls && window.controls.target) ? window.controls.target.clone() : new THREE.Vector3();
camera.position.sub(pivot).applyAxisAngle(axis, sign * args.params.angle * Math.PI / 180).add(pivot);
camera.lookAt(pivot);
return { success: true };
"#;

const ZOOM_GLOBAL: &str = r#"
if (typeof window.zoomModel !== 'function') {
  return { success: false, error: 'window.zoomModel is not defined' };
}
const out = await window.zoomModel(args.params);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;

const ZOOM_CONTROLS: &str = r#"
const controls = window.controls;
if (!controls) return { success: false, error: 'no orbit controls on page' };
const scale = args.params.scale;
if (scale >= 1 && typeof controls.dollyIn === 'function') {
  controls.dollyIn(scale);
} else if (scale < 1 && typeof controls.dollyOut === 'function') {
  controls.dollyOut(1 / scale);
} else if (typeof controls.zoom === 'number') {
  controls.zoom *= scale;
} else {
  return { success: false, error: 'controls cannot dolly' };
}
if (typeof controls.update === 'function') controls.update();
return { success: true };
"#;

const ZOOM_CAMERA: &str = r#"
const camera = window.camera;
if (!camera) return { success: false, error: 'no camera on page' };
const pivot = (window.controls && window.controls.target) ? window.controls.target : null;
if (pivot) {
  camera.position.sub(pivot).multiplyScalar(1 / args.params.scale).add(pivot);
} else {
  camera.position.multiplyScalar(1 / args.params.scale);
}
if (typeof camera.updateProjectionMatrix === 'function') camera.updateProjectionMatrix();
return { success: true };
"#;

const FOCUS_REGION: &str = r#"
const el = document.querySelector(`[data-region="${args.params.target}"]`) || document.getElementById(args.params.target);
if (!el) return { success: false, error: `no region control for ${args.params.target}` };
el.click();
return { success: true, via: 'region-control' };
"#;

const FOCUS_GLOBAL: &str = r#"
if (typeof window.focusOnModel !== 'function') {
  return { success: false, error: 'window.focusOnModel is not defined' };
}
const out = await window.focusOnModel(args.params);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;

const FOCUS_SCENE: &str = r#"
const scene = window.scene;
const camera = window.camera;
const THREE = window.THREE;
if (!scene || !camera || !THREE) return { success: false, error: 'scene graph not exposed' };
const target = args.params.target;
const node = target === 'center' ? scene : scene.getObjectByName(target);
if (!node) return { success: false, error: `no object named ${target}` };
const box = new THREE.Box3().setFromObject(node);
const center = box.getCenter(new THREE.Vector3());
if (window.controls && window.controls.target) {
  window.controls.target.copy(center);
  if (typeof window.controls.update === 'function') window.controls.update();
}
camera.lookAt(center);
return { success: true, center: [center.x, center.y, center.z] };
"#;

const RESET_GLOBAL: &str = r#"
if (typeof window.resetModel !== 'function') {
  return { success: false, error: 'window.resetModel is not defined' };
}
const out = await window.resetModel(args.params);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;

const RESET_CONTROLS: &str = r#"
const controls = window.controls;
if (!controls || typeof controls.reset !== 'function') {
  return { success: false, error: 'controls.reset is not available' };
}
controls.reset();
return { success: true };
"#;

const RESET_CAMERA: &str = r#"
const camera = window.camera;
const initial = window.initialCameraState;
if (!camera || !initial) return { success: false, error: 'no saved camera state' };
camera.position.copy(initial.position);
if (initial.rotation) camera.rotation.copy(initial.rotation);
if (typeof initial.zoom === 'number') camera.zoom = initial.zoom;
if (typeof camera.updateProjectionMatrix === 'function') camera.updateProjectionMatrix();
return { success: true };
"#;

const HIGHLIGHT_GLOBAL: &str = r#"
const fn = window.highlightComponent || window.highlightModel;
if (typeof fn !== 'function') {
  return { success: false, error: 'no highlight function on page' };
}
const out = await fn(args.params.componentId, args.params.color, args.params.durationSecs);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;

const HIGHLIGHT_SCENE: &str = r#"
const scene = window.scene;
if (!scene) return { success: false, error: 'scene graph not exposed' };
const node = scene.getObjectByName(args.params.componentId);
if (!node) return { success: false, error: `no object named ${args.params.componentId}` };
const touched = [];
node.traverse((child) => {
  if (child.material && child.material.color) {
    if (!child.userData.originalColor) child.userData.originalColor = child.material.color.clone();
    child.material.color.set(args.params.color);
    touched.push(child);
  }
});
if (args.params.durationSecs) {
  setTimeout(() => touched.forEach((c) => c.material.color.copy(c.userData.originalColor)), args.params.durationSecs * 1000);
}
return touched.length > 0
  ? { success: true, materials: touched.length }
  : { success: false, error: 'component has no colorable material' };
"#;

const CUSTOM_DISPATCH: &str = r#"
const handlers = window.sceneCommands || {};
const handler = handlers[args.action] || window[args.action];
if (typeof handler !== 'function') {
  return { success: false, error: `no page handler for ${args.action}` };
}
const out = await handler(args.params, args.target);
return (out && typeof out === 'object') ? out : { success: out !== false };
"#;
