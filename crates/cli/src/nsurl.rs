//! Network-service URLs.
//!
//! `kernel+vfio://icmp-responder/nsm-1?app=web` asks for the `icmp-responder`
//! service, preferring a kernel interface named `nsm-1` and falling back to
//! vfio, with the label `app=web`.

use networkservice::{
    mechanisms, Labels, Mechanism, MechanismType, NetworkServiceDescriptor, NetworkServiceName,
};

use crate::config::ConfigError;

/// Parses one network-service URL into a request template.
pub fn parse(url: &str) -> Result<NetworkServiceDescriptor, ConfigError> {
    let invalid = |reason: String| ConfigError::NetworkService {
        url: url.to_string(),
        reason,
    };

    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| invalid("expected <mechanism>://<service>".into()))?;
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (service, interface) = match location.split_once('/') {
        Some((service, interface)) => (service, Some(interface.trim_end_matches('/'))),
        None => (location, None),
    };

    let network_service = NetworkServiceName::new(service)
        .ok_or_else(|| invalid("missing network service name".into()))?;

    let mut mechanism_preferences = Vec::new();
    for name in scheme.split('+') {
        let mechanism_type = MechanismType::new(name)
            .ok_or_else(|| invalid(format!("empty mechanism in scheme '{scheme}'")))?;
        if mechanism_preferences
            .iter()
            .any(|m: &Mechanism| m.mechanism_type == mechanism_type)
        {
            return Err(invalid(format!("mechanism {mechanism_type} listed twice")));
        }
        mechanism_preferences.push(Mechanism::new(mechanism_type));
    }

    if let Some(interface) = interface.filter(|i| !i.is_empty()) {
        if interface.len() > mechanisms::MAX_INTERFACE_NAME_LEN {
            return Err(invalid(format!(
                "interface name '{interface}' exceeds {} characters",
                mechanisms::MAX_INTERFACE_NAME_LEN
            )));
        }
        let kernel = mechanisms::kernel();
        for mechanism in mechanism_preferences
            .iter_mut()
            .filter(|m| m.mechanism_type == kernel)
        {
            mechanism
                .parameters
                .insert(mechanisms::INTERFACE_NAME.to_string(), interface.to_string());
        }
    }

    let mut labels = Labels::new();
    for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key.is_empty() {
            return Err(invalid(format!("label '{pair}' has no key")));
        }
        labels.insert(key.to_string(), value.to_string());
    }

    Ok(NetworkServiceDescriptor {
        network_service,
        labels,
        mechanism_preferences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_order_is_preference_order() {
        let descriptor = parse("vfio+kernel://svc-b").unwrap();
        let order: Vec<&str> = descriptor
            .mechanism_preferences
            .iter()
            .map(|m| m.mechanism_type.as_str())
            .collect();
        assert_eq!(order, vec!["VFIO", "KERNEL"]);
        assert_eq!(descriptor.network_service.as_str(), "svc-b");
        assert!(descriptor.labels.is_empty());
    }

    #[test]
    fn path_names_the_kernel_interface_only() {
        let descriptor = parse("kernel+vfio://icmp-responder/nsm-1").unwrap();
        assert_eq!(
            descriptor.mechanism_preferences[0].parameter(mechanisms::INTERFACE_NAME),
            Some("nsm-1")
        );
        assert_eq!(
            descriptor.mechanism_preferences[1].parameter(mechanisms::INTERFACE_NAME),
            None
        );
    }

    #[test]
    fn query_becomes_labels() {
        let descriptor = parse("kernel://svc?app=web&sriovToken=intel/10G&flag").unwrap();
        assert_eq!(descriptor.labels["app"], "web");
        assert_eq!(descriptor.labels["sriovToken"], "intel/10G");
        assert_eq!(descriptor.labels["flag"], "");
    }

    #[test]
    fn rejects_malformed_urls() {
        for bad in [
            "svc",
            "kernel://",
            "kernel+://svc",
            "kernel+kernel://svc",
            "kernel://svc/an-interface-name-too-long",
            "kernel://svc?=value",
        ] {
            assert!(parse(bad).is_err(), "{bad} should be refused");
        }
    }
}
