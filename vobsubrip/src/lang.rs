//! DVD language ids.
//!
//! A DVD language id is just the two ISO-639-1 letters of the language
//! code packed into a big-endian `u16`, so `0x656e` is `"en"`.  The
//! display names below follow the table that VobSub-compatible tools
//! ship, quirks included.

const fn id(code: &[u8; 2]) -> u16 {
    (code[0] as u16) << 8 | code[1] as u16
}

/// Language display names, sorted by id for binary search.
static LANG_TABLE: [(u16, &str); 144] = [
    (id(b"--"), "(Not detected)"),
    (id(b"aa"), "Afar"),
    (id(b"ab"), "Abkhazian"),
    (id(b"af"), "Afrikaans"),
    (id(b"am"), "Amharic"),
    (id(b"ar"), "Arabic"),
    (id(b"as"), "Assamese"),
    (id(b"ay"), "Aymara"),
    (id(b"az"), "Azerbaijani"),
    (id(b"ba"), "Bashkir"),
    (id(b"be"), "Byelorussian"),
    (id(b"bg"), "Bulgarian"),
    (id(b"bh"), "Bihari"),
    (id(b"bi"), "Bislama"),
    (id(b"bn"), "Bengali; Bangla"),
    (id(b"bo"), "Tibetan"),
    (id(b"br"), "Breton"),
    (id(b"ca"), "Catalan"),
    (id(b"cc"), "Closed Caption"),
    (id(b"co"), "Corsican"),
    (id(b"cs"), "Czech"),
    (id(b"cy"), "Welsh"),
    (id(b"da"), "Dansk"),
    (id(b"de"), "Deutsch"),
    (id(b"dz"), "Bhutani"),
    (id(b"el"), "Greek"),
    (id(b"en"), "English"),
    (id(b"eo"), "Esperanto"),
    (id(b"es"), "Espanol"),
    (id(b"et"), "Estonian"),
    (id(b"eu"), "Basque"),
    (id(b"fa"), "Persian"),
    (id(b"fi"), "Finnish"),
    (id(b"fj"), "Fiji"),
    (id(b"fo"), "Faroese"),
    (id(b"fr"), "Francais"),
    (id(b"fy"), "Frisian"),
    (id(b"ga"), "Irish"),
    (id(b"gd"), "Scots Gaelic"),
    (id(b"gl"), "Galician"),
    (id(b"gn"), "Guarani"),
    (id(b"gu"), "Gujarati"),
    (id(b"ha"), "Hausa"),
    (id(b"he"), "Hebrew"),
    (id(b"hi"), "Hindi"),
    (id(b"hr"), "Hrvatski"),
    (id(b"hu"), "Hungarian"),
    (id(b"hy"), "Armenian"),
    (id(b"ia"), "Interlingua"),
    (id(b"id"), "Indonesian"),
    (id(b"ie"), "Interlingue"),
    (id(b"ik"), "Inupiak"),
    (id(b"in"), "Indonesian"),
    (id(b"is"), "Islenska"),
    (id(b"it"), "Italiano"),
    (id(b"iu"), "Inuktitut"),
    (id(b"iw"), "Hebrew"),
    (id(b"ja"), "Japanese"),
    (id(b"ji"), "Yiddish"),
    (id(b"jw"), "Javanese"),
    (id(b"ka"), "Georgian"),
    (id(b"kk"), "Kazakh"),
    (id(b"kl"), "Greenlandic"),
    (id(b"km"), "Cambodian"),
    (id(b"kn"), "Kannada"),
    (id(b"ko"), "Korean"),
    (id(b"ks"), "Kashmiri"),
    (id(b"ku"), "Kurdish"),
    (id(b"ky"), "Kirghiz"),
    (id(b"la"), "Latin"),
    (id(b"ln"), "Lingala"),
    (id(b"lo"), "Laothian"),
    (id(b"lt"), "Lithuanian"),
    (id(b"lv"), "Latvian, Lettish"),
    (id(b"mg"), "Malagasy"),
    (id(b"mi"), "Maori"),
    (id(b"mk"), "Macedonian"),
    (id(b"ml"), "Malayalam"),
    (id(b"mn"), "Mongolian"),
    (id(b"mo"), "Moldavian"),
    (id(b"mr"), "Marathi"),
    (id(b"ms"), "Malay"),
    (id(b"mt"), "Maltese"),
    (id(b"my"), "Burmese"),
    (id(b"na"), "Nauru"),
    (id(b"ne"), "Nepali"),
    (id(b"nl"), "Nederlands"),
    (id(b"no"), "Norsk"),
    (id(b"oc"), "Occitan"),
    (id(b"om"), "(Afan) Oromo"),
    (id(b"or"), "Oriya"),
    (id(b"pa"), "Punjabi"),
    (id(b"pl"), "Polish"),
    (id(b"ps"), "Pashto, Pushto"),
    (id(b"pt"), "Portugues"),
    (id(b"qu"), "Quechua"),
    (id(b"rm"), "Rhaeto-Romance"),
    (id(b"rn"), "Kirundi"),
    (id(b"ro"), "Romanian"),
    (id(b"ru"), "Russian"),
    (id(b"rw"), "Kinyarwanda"),
    (id(b"sa"), "Sanskrit"),
    (id(b"sd"), "Sindhi"),
    (id(b"sg"), "Sangho"),
    (id(b"sh"), "Serbo-Croatian"),
    (id(b"si"), "Sinhalese"),
    (id(b"sk"), "Slovak"),
    (id(b"sl"), "Slovenian"),
    (id(b"sm"), "Samoan"),
    (id(b"sn"), "Shona"),
    (id(b"so"), "Somali"),
    (id(b"sq"), "Albanian"),
    (id(b"sr"), "Serbian"),
    (id(b"ss"), "Siswati"),
    (id(b"st"), "Sesotho"),
    (id(b"su"), "Sundanese"),
    (id(b"sv"), "Svenska"),
    (id(b"sw"), "Swahili"),
    (id(b"ta"), "Tamil"),
    (id(b"te"), "Telugu"),
    (id(b"tg"), "Tajik"),
    (id(b"th"), "Thai"),
    (id(b"ti"), "Tigrinya"),
    (id(b"tk"), "Turkmen"),
    (id(b"tl"), "Tagalog"),
    (id(b"tn"), "Setswana"),
    (id(b"to"), "Tonga"),
    (id(b"tr"), "Turkish"),
    (id(b"ts"), "Tsonga"),
    (id(b"tt"), "Tatar"),
    (id(b"tw"), "Twi"),
    (id(b"ug"), "Uighur"),
    (id(b"uk"), "Ukrainian"),
    (id(b"ur"), "Urdu"),
    (id(b"uz"), "Uzbek"),
    (id(b"vi"), "Vietnamese"),
    (id(b"vo"), "Volapuk"),
    (id(b"wo"), "Wolof"),
    (id(b"xh"), "Xhosa"),
    (id(b"yi"), "Yiddish"),
    (id(b"yo"), "Yoruba"),
    (id(b"za"), "Zhuang"),
    (id(b"zh"), "Chinese"),
    (id(b"zu"), "Zulu"),
];

/// The display name for a language id, or `"(Not detected)"` for ids we
/// do not know.
pub fn lang_name(lang_id: u16) -> &'static str {
    match LANG_TABLE.binary_search_by_key(&lang_id, |&(k, _)| k) {
        Ok(idx) => LANG_TABLE[idx].1,
        Err(_) => LANG_TABLE[0].1,
    }
}

/// The two-letter code for a language id, or `"--"` if the id is not two
/// ASCII letters.
pub fn lang_code(lang_id: u16) -> String {
    let bytes = [(lang_id >> 8) as u8, lang_id as u8];
    if bytes.iter().all(|b| b.is_ascii_lowercase()) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        "--".to_string()
    }
}

/// Parse a two-letter code back into a language id.  Codes missing from
/// the table are rejected, not fabricated.
pub fn lang_id(code: &str) -> Option<u16> {
    let bytes = code.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    let id = (bytes[0] as u16) << 8 | u16::from(bytes[1]);
    LANG_TABLE
        .binary_search_by_key(&id, |&(k, _)| k)
        .ok()
        .map(|_| id)
}

#[test]
fn look_up_languages() {
    assert_eq!(lang_name(0x656e), "English");
    assert_eq!(lang_name(0x6a61), "Japanese");
    assert_eq!(lang_name(0x0000), "(Not detected)");
    assert_eq!(lang_code(0x656e), "en");
    assert_eq!(lang_code(0x0000), "--");
    assert_eq!(lang_id("en"), Some(0x656e));
    assert_eq!(lang_id("English"), None);
    // Well-formed but unassigned codes are not languages.
    assert_eq!(lang_id("qx"), None);
}

#[test]
fn table_is_sorted() {
    for pair in LANG_TABLE.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
}
