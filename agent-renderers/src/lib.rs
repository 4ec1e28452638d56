pub mod clash;
pub mod dnsmasq;
pub mod easytier;
pub mod hosts;
pub mod mosdns;
pub mod openvpn;
pub mod routing;
pub mod tinc;
pub mod util;
pub mod wireguard;

use agent_render::RendererCatalog;
use std::sync::Arc;

/// Register every concrete renderer this crate ships (spec §4.3's
/// Renderer Invoker dispatch table, one entry per §4.5 handler).
pub fn register_all(catalog: &mut RendererCatalog) {
    catalog.register(Arc::new(easytier::EasytierRenderer));
    catalog.register(Arc::new(tinc::TincRenderer));
    catalog.register(Arc::new(openvpn::OpenvpnRenderer));
    catalog.register(Arc::new(wireguard::WireguardRenderer));
    catalog.register(Arc::new(routing::RoutingRenderer));
    catalog.register(Arc::new(clash::ClashRenderer));
    catalog.register(Arc::new(mosdns::MosdnsRenderer));
    catalog.register(Arc::new(dnsmasq::DnsmasqRenderer));
    catalog.register(Arc::new(hosts::HostsRenderer));
}
