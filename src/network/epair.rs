//! Epair teardown for VNET jails
//!
//! Epairs are virtual Ethernet pairs; one end lives in the jail's VNET.
//! Destroying either end destroys both, so the jail-side end is enough.

use crate::error::{Error, Result};
use crate::host::Host;
use crate::jail::JailIdentity;
use crate::trace::Tracer;

/// Destroy every epair interface left in a VNET jail
///
/// Destroys one interface per round and re-lists, since destroying one end
/// can make its peer disappear from the listing as well. The number of epairs
/// must strictly decrease each round; if it does not, destruction is silently
/// failing and `Error::InterfaceCountNotDecreasing` is returned instead of
/// looping forever.
///
/// Returns the number of interfaces destroyed.
pub fn destroy_vnet_interfaces<H: Host>(
    host: &H,
    jail: &JailIdentity,
    tracer: &Tracer,
) -> Result<usize> {
    let mut previous: Option<usize> = None;
    let mut destroyed = 0;

    loop {
        let epairs: Vec<_> = host
            .list_interfaces(Some(jail.jid))?
            .into_iter()
            .filter(|iface| iface.is_epair())
            .collect();

        let Some(first) = epairs.first() else {
            return Ok(destroyed);
        };

        if let Some(before) = previous
            && epairs.len() >= before
        {
            return Err(Error::InterfaceCountNotDecreasing {
                jail: jail.name.clone(),
                before,
                after: epairs.len(),
            });
        }

        tracer.info(format!(
            "Destroying interface {} ({}) in jail '{}'",
            first.name, first.driver_name, jail.name
        ));
        host.destroy_interface(jail.jid, &first.name)?;

        destroyed += 1;
        previous = Some(epairs.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;
    use crate::network::NetifInfo;

    fn vnet_jail() -> JailIdentity {
        JailIdentity::new(42, "test1", "/jails/test1").with_param("vnet", "new")
    }

    #[test]
    fn test_destroys_each_epair_once() {
        let host = FakeHost::new();
        host.state().interfaces = vec![
            NetifInfo::new("lo0", "lo0"),
            NetifInfo::new("epair0b", "epair0"),
            NetifInfo::new("e1b_test1", "epair1"),
            NetifInfo::new("epair2b", "epair2"),
        ];

        let destroyed = destroy_vnet_interfaces(&host, &vnet_jail(), &Tracer::new()).unwrap();

        let state = host.state();
        assert_eq!(destroyed, 3);
        assert_eq!(
            state.destroyed_interfaces,
            vec!["epair0b", "e1b_test1", "epair2b"]
        );
        // N destroys need N + 1 listings
        assert_eq!(state.interface_listings, 4);
        assert_eq!(state.interfaces, vec![NetifInfo::new("lo0", "lo0")]);
    }

    #[test]
    fn test_no_epairs_is_noop() {
        let host = FakeHost::new();
        host.state().interfaces = vec![NetifInfo::new("lo0", "lo0")];

        assert_eq!(
            destroy_vnet_interfaces(&host, &vnet_jail(), &Tracer::new()).unwrap(),
            0
        );
        assert!(host.state().destroyed_interfaces.is_empty());
    }

    #[test]
    fn test_stuck_listing_is_an_invariant_violation() {
        let host = FakeHost::new();
        {
            let mut state = host.state();
            state.interfaces = vec![
                NetifInfo::new("epair0b", "epair0"),
                NetifInfo::new("epair1b", "epair1"),
            ];
            state.interfaces_stuck = true;
        }

        let err = destroy_vnet_interfaces(&host, &vnet_jail(), &Tracer::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::InterfaceCountNotDecreasing {
                before: 2,
                after: 2,
                ..
            }
        ));
        // One destroy attempt, then the second listing trips the check
        assert_eq!(host.state().destroyed_interfaces, vec!["epair0b"]);
    }
}
