// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtp_crypto::rsa::Key;

/// External, read-only-after-init source of the RSA public keys Telegram's
/// datacenters sign their handshake answers with. A caller that talks to a
/// private test cluster, or wants to pin a narrower key set, supplies its
/// own; [`KnownRsaKeys`] is the production/test default.
pub trait PublicRsaKeyRegister: Send + Sync {
    /// Returns the key matching `fingerprint`, if any.
    fn key_for_fingerprint(&self, fingerprint: i64) -> Option<Key>;
}

/// The RSA keys Telegram has published for its production and test
/// clusters, keyed by fingerprint.
#[derive(Clone, Copy, Debug, Default)]
pub struct KnownRsaKeys;

impl PublicRsaKeyRegister for KnownRsaKeys {
    #[allow(clippy::unreadable_literal)]
    fn key_for_fingerprint(&self, fingerprint: i64) -> Option<Key> {
        Some(match fingerprint {
            // Production
            -3414540481677951611 => Key::new("29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323", "65537").unwrap(),
            // Test
            -5595554452916591101 => Key::new("25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949", "65537").unwrap(),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_cover_production_and_test() {
        let register = KnownRsaKeys;
        assert!(register.key_for_fingerprint(-3414540481677951611).is_some());
        assert!(register.key_for_fingerprint(-5595554452916591101).is_some());
        assert!(register.key_for_fingerprint(0).is_none());
    }
}
