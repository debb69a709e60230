use super::{CausalPattern, PatternId, PatternStep, StepRole};
use crate::kernel::EventType;

fn step(
    event_type: EventType,
    role: StepRole,
    optional: bool,
    window_secs: u64,
    description: &'static str,
) -> PatternStep {
    PatternStep { event_type, role, optional, window_secs, description }
}

/// MemoryPressure -> OOMKill -> evidence capture -> restart.
pub fn oom_kill_pattern() -> CausalPattern {
    CausalPattern {
        id: PatternId::OOM_KILL,
        name: "OOMKill Causal Chain",
        description: "Memory pressure leading to kernel OOMKill and evidence rotation",
        steps: vec![
            step(
                EventType::NodeMemoryPressure,
                StepRole::Precursor,
                true,
                300,
                "Node memory pressure preceding OOMKill",
            ),
            step(EventType::OomKill, StepRole::Trigger, false, 0, "Kernel OOM killer terminates container"),
            // lastState is overwritten on the next transition, ~90s after the kill.
            step(
                EventType::OomKillEvidence,
                StepRole::Evidence,
                false,
                90,
                "LastTerminationState evidence captured before rotation",
            ),
            step(EventType::ContainerTerminated, StepRole::Effect, false, 10, "Container restart following OOMKill"),
        ],
        remediation_actions: vec!["increase_memory_limit", "add_vpa_recommendation", "alert_engineering"],
    }
}

/// ConfigMapChanged -> no restart of env consumers -> stale config in effect.
pub fn config_env_pattern() -> CausalPattern {
    CausalPattern {
        id: PatternId::CONFIG_ENV,
        name: "ConfigMap Env Var Silent Misconfiguration",
        description: "ConfigMap update not propagated to pods consuming it as env vars",
        steps: vec![
            step(EventType::ConfigMapChanged, StepRole::Trigger, false, 0, "ConfigMap content changed"),
            step(
                EventType::PodNotRestarted,
                StepRole::Absence,
                false,
                120,
                "No pod restart observed for env var consumers",
            ),
        ],
        remediation_actions: vec!["rollout_restart_deployment", "alert_config_drift"],
    }
}

/// ConfigMapChanged -> kubelet atomic symlink swap, no restart.
pub fn config_mount_pattern() -> CausalPattern {
    CausalPattern {
        id: PatternId::CONFIG_MOUNT,
        name: "ConfigMap Volume Mount Symlink Swap",
        description: "ConfigMap update propagated via kubelet atomic symlink swap",
        steps: vec![
            step(EventType::ConfigMapChanged, StepRole::Trigger, false, 0, "ConfigMap content changed"),
            step(EventType::KubeletSync, StepRole::Propagation, true, 90, "Kubelet syncs ConfigMap via symlink swap"),
        ],
        remediation_actions: vec!["verify_inotify_watch_pattern", "check_app_reload_logs"],
    }
}
